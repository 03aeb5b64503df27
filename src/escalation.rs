//! Upgrade retry escalation.
//!
//! `apt-get full-upgrade` runs once plainly. If it fails, the captured output
//! is matched against the conflict rules in order; the first rule that
//! matches and has not fired yet runs its remedy, then the upgrade is retried.
//! With the default rules that gives the fixed three tiers:
//!
//! ```text
//! full-upgrade
//!   └─ "trying to overwrite"        → full-upgrade --force-overwrite
//!        └─ "Unmet dependencies"/"Depends:" → apt-get -f install
//!                                          → full-upgrade --force-overwrite
//! ```
//!
//! Each rule fires at most once and there is no backoff, so a run makes at
//! most `rules + 1` upgrade attempts. A process killed by a signal stops the
//! escalation at once: that is the operator interrupting, not a conflict.

use crate::command_runner::{CommandOutput, CommandRunner};
use crate::commands::apt::{AptFixBroken, AptFullUpgrade, AptPurge};
use crate::commands::dpkg::{parse_installed, DpkgConfigurePending, DpkgQueryInstalled};
use crate::config::{CompiledRule, Remedy};
use crate::error::Result;
use crate::report::Reporter;
use std::fmt;
use tracing::debug;

/// One `full-upgrade` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub number: usize,
    pub force_overwrite: bool,
    /// Rule that triggered this retry; `None` for the first attempt.
    pub triggered_by: Option<String>,
    pub success: bool,
    pub exit_code: Option<i32>,
}

impl fmt::Display for AttemptRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt {}: {}{}{}",
            self.number,
            if self.success { "succeeded" } else { "failed" },
            if self.force_overwrite { " (force-overwrite)" } else { "" },
            self.triggered_by
                .as_deref()
                .map(|r| format!(" after rule '{}'", r))
                .unwrap_or_default()
        )
    }
}

/// Why escalation stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Succeeded,
    /// The last failure matched no rule that hadn't fired yet.
    NoMatchingRule,
    /// full-upgrade was killed by a signal.
    Interrupted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "upgrade succeeded"),
            Self::NoMatchingRule => write!(f, "upgrade failed, no remaining remedy"),
            Self::Interrupted => write!(f, "upgrade interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationOutcome {
    pub attempts: Vec<AttemptRecord>,
    /// Rule names in the order they fired.
    pub applied_rules: Vec<String>,
    /// Remedy commands that ran, for the report.
    pub remedies: Vec<String>,
    pub stop: StopReason,
}

impl EscalationOutcome {
    pub fn succeeded(&self) -> bool {
        self.stop == StopReason::Succeeded
    }
}

/// Runs the upgrade with rule-driven retries.
pub struct Escalation<'a> {
    runner: &'a dyn CommandRunner,
    rules: &'a [CompiledRule],
    reporter: &'a Reporter,
}

impl<'a> Escalation<'a> {
    pub fn new(runner: &'a dyn CommandRunner, rules: &'a [CompiledRule], reporter: &'a Reporter) -> Self {
        Self {
            runner,
            rules,
            reporter,
        }
    }

    pub fn run(&self) -> Result<EscalationOutcome> {
        let mut outcome = EscalationOutcome {
            attempts: Vec::new(),
            applied_rules: Vec::new(),
            remedies: Vec::new(),
            stop: StopReason::NoMatchingRule,
        };
        let mut force_overwrite = false;

        self.reporter.info("Running full-upgrade");
        let mut last = self.attempt(&mut outcome, force_overwrite, None)?;

        loop {
            if last.success {
                outcome.stop = StopReason::Succeeded;
                self.reporter.ok("full-upgrade completed");
                break;
            }
            if last.was_signaled() {
                outcome.stop = StopReason::Interrupted;
                self.reporter.fail("full-upgrade was interrupted");
                break;
            }

            let text = last.combined();
            let next = self
                .rules
                .iter()
                .find(|r| !outcome.applied_rules.iter().any(|a| a == r.name()) && r.matches(&text));

            let Some(rule) = next else {
                outcome.stop = StopReason::NoMatchingRule;
                self.reporter.fail("full-upgrade failed and no remedy applies");
                break;
            };

            self.reporter
                .warn(&format!("full-upgrade failed, applying remedy '{}'", rule.name()));
            outcome.applied_rules.push(rule.name().to_string());
            self.apply_remedy(&rule.rule.remedy, &mut outcome)?;

            force_overwrite |= rule.rule.force_overwrite;
            last = self.attempt(&mut outcome, force_overwrite, Some(rule.name()))?;
        }

        Ok(outcome)
    }

    fn attempt(
        &self,
        outcome: &mut EscalationOutcome,
        force_overwrite: bool,
        triggered_by: Option<&str>,
    ) -> Result<CommandOutput> {
        let output = self.runner.run(&AptFullUpgrade { force_overwrite })?;
        let record = AttemptRecord {
            number: outcome.attempts.len() + 1,
            force_overwrite,
            triggered_by: triggered_by.map(str::to_string),
            success: output.success,
            exit_code: output.exit_code,
        };
        debug!("{}", record);
        outcome.attempts.push(record);
        Ok(output)
    }

    fn apply_remedy(&self, remedy: &Remedy, outcome: &mut EscalationOutcome) -> Result<()> {
        match remedy {
            Remedy::None => {}
            Remedy::FixBroken => {
                let out = self.runner.run(&AptFixBroken)?;
                outcome.remedies.push("apt-get -f install".to_string());
                if !out.success {
                    self.reporter.warn("apt-get -f install did not succeed; retrying anyway");
                }
            }
            Remedy::ConfigurePending => {
                let out = self.runner.run(&DpkgConfigurePending)?;
                outcome.remedies.push("dpkg --configure -a".to_string());
                if !out.success {
                    self.reporter.warn("dpkg --configure -a did not succeed; retrying anyway");
                }
            }
            Remedy::RemovePackages { packages } => {
                let installed = installed_subset(self.runner, packages)?;
                if installed.is_empty() {
                    self.reporter.info("none of the conflicting packages are installed");
                    return Ok(());
                }
                self.reporter
                    .info(&format!("removing conflicting packages: {}", installed.join(" ")));
                let out = self.runner.run(&AptPurge {
                    packages: installed.clone(),
                })?;
                outcome
                    .remedies
                    .push(format!("apt-get purge {}", installed.join(" ")));
                if !out.success {
                    self.reporter.warn("package removal did not succeed; retrying anyway");
                }
            }
        }
        Ok(())
    }
}

/// Which of `packages` are currently installed.
pub fn installed_subset(runner: &dyn CommandRunner, packages: &[String]) -> Result<Vec<String>> {
    if packages.is_empty() {
        return Ok(vec![]);
    }
    let out = runner.run(&DpkgQueryInstalled {
        patterns: packages.to_vec(),
    })?;
    let installed = parse_installed(&out.stdout);
    Ok(packages
        .iter()
        .filter(|p| installed.iter().any(|i| &i.name == *p))
        .cloned()
        .collect())
}
