//! Upgrade orchestration.
//!
//! [`Upgrader`] walks the stage machine from pre-flight to completion. Every
//! external command goes through the injected [`CommandRunner`] and every
//! question through the injected [`Prompter`], so the whole flow runs the
//! same against the live system, in dry-run mode, or against a scripted
//! fake in tests.

use crate::backup::{create_backup, BackupManifest};
use crate::boot::{handle_reboot, run_boot_checks, BootCheckReport};
use crate::command_runner::CommandRunner;
use crate::commands::apt::{AptFixBroken, AptPurge, AptUpdate};
use crate::commands::dpkg::DpkgConfigurePending;
use crate::config::{CompiledRule, ConflictRule, UpgradeConfig};
use crate::context::{Profile, RunContext};
use crate::error::{Result, UpgradeError};
use crate::escalation::{installed_subset, Escalation, EscalationOutcome};
use crate::hardware::HardwareFacts;
use crate::os_release::{running_kernel, OsRelease};
use crate::platform::{run_platform_checks, PlatformReport};
use crate::preflight::{verify_environment, PreflightReport};
use crate::prompt::Prompter;
use crate::report::{FinalReport, Reporter};
use crate::upgrade_state::{UpgradeStage, UpgradeTracker};
use crate::verify::{run_cleanup, run_verification, VerificationReport};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

/// Name of the default rule the framework-transition rule goes in front of.
const DEPENDENCY_RULE: &str = "unmet-dependencies";

/// What a finished run did.
#[derive(Debug, Clone)]
pub struct UpgradeSummary {
    pub stages: Vec<UpgradeStage>,
    pub escalation: EscalationOutcome,
    pub removed_packages: Vec<String>,
    pub backup: BackupManifest,
    pub verification: VerificationReport,
    pub boot: BootCheckReport,
    /// Written for the sbc profile only.
    pub report_file: Option<PathBuf>,
    pub rebooted: bool,
}

pub struct Upgrader<'a> {
    ctx: &'a RunContext,
    config: &'a UpgradeConfig,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    reporter: &'a Reporter,
    root: PathBuf,
    preflight: Option<PreflightReport>,
}

/// Facts gathered before confirmation by the sbc profile.
#[derive(Default)]
struct SbcFacts {
    hardware: Option<HardwareFacts>,
    platform: Option<PlatformReport>,
}

impl<'a> Upgrader<'a> {
    pub fn new(
        ctx: &'a RunContext,
        config: &'a UpgradeConfig,
        runner: &'a dyn CommandRunner,
        prompter: &'a dyn Prompter,
        reporter: &'a Reporter,
    ) -> Self {
        Self {
            ctx,
            config,
            runner,
            prompter,
            reporter,
            root: PathBuf::from("/"),
            preflight: None,
        }
    }

    /// Read hardware and boot files under `root` instead of `/`.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Use a precomputed pre-flight result instead of probing the live system.
    pub fn with_preflight(mut self, report: PreflightReport) -> Self {
        self.preflight = Some(report);
        self
    }

    pub fn run(&self) -> Result<UpgradeSummary> {
        let mut tracker = UpgradeTracker::new(self.ctx.profile());
        match self.execute(&mut tracker) {
            Ok(summary) => Ok(summary),
            Err(e) => {
                let stage = tracker.current_stage();
                // A failed fail() only means we were already terminal
                let _ = tracker.fail();
                self.reporter.fail(&format!("{} ({})", e, stage));
                Err(e)
            }
        }
    }

    fn execute(&self, tracker: &mut UpgradeTracker) -> Result<UpgradeSummary> {
        let profile = self.ctx.profile();

        tracker.transition_to(UpgradeStage::Preflight)?;
        self.run_preflight()?;

        let mut facts = SbcFacts::default();
        if profile == Profile::Sbc {
            tracker.transition_to(UpgradeStage::HardwareDetection)?;
            facts.hardware = Some(self.detect_hardware()?);

            tracker.transition_to(UpgradeStage::PlatformChecks)?;
            if let Some(hw) = &facts.hardware {
                facts.platform = Some(self.platform_checks(hw)?);
            }
        }
        let rules = self.conflict_rules(facts.platform.as_ref())?;

        tracker.transition_to(UpgradeStage::Confirmation)?;
        self.reporter.header("Confirmation");
        if self.ctx.dry_run() {
            self.reporter
                .info("Dry run: package changes are shown but not executed");
        }
        if !self.prompter.confirm(
            &format!("Upgrade {} now? A backup of the APT sources is taken first.", self.ctx.os()),
            false,
        ) {
            return Err(UpgradeError::aborted("upgrade declined at confirmation"));
        }
        tracker.confirm();

        tracker.transition_to(UpgradeStage::Backup)?;
        self.reporter.header("Backup");
        let backup = create_backup(self.runner, self.config, self.ctx.timestamp())?;
        for skipped in &backup.skipped {
            self.reporter
                .warn(&format!("{} not found, not backed up", skipped.display()));
        }
        self.reporter
            .ok(&format!("Backup written to {}", backup.dir.display()));

        tracker.transition_to(UpgradeStage::RefreshIndex)?;
        self.reporter.header("Package index");
        self.runner.run(&AptUpdate)?.ensure_success("apt-get update")?;
        self.reporter.ok("Package index refreshed");

        tracker.transition_to(UpgradeStage::RepairBroken)?;
        self.reporter.header("Repair");
        self.repair_broken()?;

        tracker.transition_to(UpgradeStage::RemoveProblematic)?;
        let removed_packages = self.remove_problematic()?;

        tracker.transition_to(UpgradeStage::FullUpgrade)?;
        self.reporter.header("Full upgrade");
        let escalation = Escalation::new(self.runner, &rules, self.reporter).run()?;
        if !escalation.succeeded() {
            return Err(UpgradeError::UpgradeFailed {
                attempts: escalation.attempts.len(),
                log: self.ctx.log_file(),
            });
        }

        tracker.transition_to(UpgradeStage::Cleanup)?;
        self.reporter.header("Cleanup");
        let cleanup = run_cleanup(self.runner)?;
        if cleanup.autoremove_ok && cleanup.clean_ok {
            self.reporter.ok("Unused packages and cached archives removed");
        } else {
            self.reporter.warn("Cleanup did not complete; run apt-get autoremove manually");
        }

        tracker.transition_to(UpgradeStage::Verification)?;
        self.reporter.header("Verification");
        let verification = run_verification(self.runner)?;
        if verification.is_clean() {
            self.reporter.ok("Package database is consistent");
        } else {
            for line in verification.to_lines() {
                self.reporter.warn(&line);
            }
        }
        if !verification.held_packages.is_empty() {
            self.reporter.warn(&format!(
                "Held packages were not upgraded: {}",
                verification.held_packages.join(" ")
            ));
        }

        tracker.transition_to(UpgradeStage::BootChecks)?;
        self.reporter.header("Boot");
        let armbian = match &facts.hardware {
            Some(hw) => hw.armbian.is_some(),
            None => self.root.join("etc/armbian-release").exists(),
        };
        let boot = run_boot_checks(self.runner, &self.root, armbian)?;
        let boot_warnings = boot.warnings();
        if boot_warnings.is_empty() {
            self.reporter.ok("Kernel, initramfs and bootloader look good");
        }
        for warning in boot_warnings {
            self.reporter.warn(&warning);
        }

        tracker.transition_to(UpgradeStage::Report)?;
        let report_file = if profile == Profile::Sbc {
            let report = FinalReport {
                started: self.ctx.timestamp().to_string(),
                os_before: self.ctx.os().clone(),
                os_after: Some(OsRelease::detect(&self.root)),
                kernel: running_kernel(),
                hardware: facts.hardware,
                platform: facts.platform,
                backup: Some(backup.clone()),
                removed_packages: removed_packages.clone(),
                escalation: Some(escalation.clone()),
                verification: Some(verification.clone()),
                boot: Some(boot.clone()),
                log_file: Some(self.ctx.log_file().display().to_string()),
            };
            let path = self.ctx.report_file();
            report.write_to(&path)?;
            self.reporter.ok(&format!("Report written to {}", path.display()));
            Some(path)
        } else {
            None
        };

        tracker.transition_to(UpgradeStage::Completed)?;
        self.reporter.ok("Distribution upgrade complete");

        let rebooted = handle_reboot(self.runner, self.prompter, self.config.reboot, self.reporter)?;

        Ok(UpgradeSummary {
            stages: tracker.stages(),
            escalation,
            removed_packages,
            backup,
            verification,
            boot,
            report_file,
            rebooted,
        })
    }

    fn run_preflight(&self) -> Result<()> {
        self.reporter.header("Pre-flight checks");
        let report = match &self.preflight {
            Some(report) => report.clone(),
            None => verify_environment(self.config.min_free_space_mb),
        };

        let failures = report.blocking_failures();
        if !failures.is_empty() {
            for failure in &failures {
                self.reporter.fail(failure);
            }
            return Err(UpgradeError::preflight(failures.join("; ")));
        }

        self.reporter.info(&format!(
            "System: {}, kernel {}",
            self.ctx.os(),
            running_kernel()
        ));
        if !self.ctx.os().is_debian_family() {
            self.reporter
                .warn("This does not look like a Debian-family system");
        }

        let warnings = report.warnings();
        for warning in &warnings {
            self.reporter.warn(warning);
        }
        if !warnings.is_empty() && !self.prompter.confirm("Continue anyway?", false) {
            return Err(UpgradeError::aborted("declined after pre-flight warnings"));
        }
        self.reporter.ok("Pre-flight checks passed");
        Ok(())
    }

    fn detect_hardware(&self) -> Result<HardwareFacts> {
        self.reporter.header("Hardware detection");
        let facts = HardwareFacts::detect(&self.root);
        let lines = facts.to_lines();
        for line in &lines {
            self.reporter.info(line);
        }
        if !facts.is_single_board() {
            self.reporter
                .warn("No device tree found; board-specific checks will be limited");
        }

        let path = self.ctx.hardware_log_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, format!("{}\n", lines.join("\n"))).map_err(|e| {
            UpgradeError::hardware(format!("cannot write {}: {}", path.display(), e))
        })?;
        debug!("Hardware facts written to {}", path.display());
        Ok(facts)
    }

    fn platform_checks(&self, facts: &HardwareFacts) -> Result<PlatformReport> {
        self.reporter.header("Platform checks");
        let report = run_platform_checks(
            self.runner,
            &self.root,
            facts,
            &self.config.desktop_probe_packages,
        )?;
        let warnings = report.warnings();
        if warnings.is_empty() {
            self.reporter.ok("No platform issues found");
        }
        for warning in warnings {
            self.reporter.warn(&warning);
        }
        Ok(report)
    }

    /// Configured rules, with the framework-transition rule inserted ahead of
    /// the dependency rule when a desktop transition was detected.
    fn conflict_rules(&self, platform: Option<&PlatformReport>) -> Result<Vec<CompiledRule>> {
        let mut rules = self.config.conflict_rules.clone();
        if let Some(probe) = platform.and_then(PlatformReport::transition) {
            if !self.config.transition_packages.is_empty() {
                info!("Enabling framework-transition rule for {}", probe.package);
                let position = rules
                    .iter()
                    .position(|r| r.name == DEPENDENCY_RULE)
                    .unwrap_or(rules.len());
                rules.insert(
                    position,
                    ConflictRule::framework_transition(&self.config.transition_packages),
                );
            }
        }
        rules.iter().map(CompiledRule::compile).collect()
    }

    fn repair_broken(&self) -> Result<()> {
        let configure = self.runner.run(&DpkgConfigurePending)?;
        let fix = self.runner.run(&AptFixBroken)?;
        if configure.success && fix.success {
            self.reporter.ok("No broken packages left");
        } else {
            self.reporter
                .warn("Broken package repair reported errors; the upgrade will try again");
        }
        Ok(())
    }

    fn remove_problematic(&self) -> Result<Vec<String>> {
        let installed = installed_subset(self.runner, &self.config.problematic_packages)?;
        if installed.is_empty() {
            return Ok(vec![]);
        }
        self.reporter.header("Problematic packages");
        self.reporter.warn(&format!(
            "Known to block upgrades: {}",
            installed.join(" ")
        ));
        if !self.prompter.confirm("Remove these packages before upgrading?", true) {
            self.reporter.info("Keeping problematic packages");
            return Ok(vec![]);
        }
        let out = self.runner.run(&AptPurge {
            packages: installed.clone(),
        })?;
        if !out.success {
            self.reporter
                .warn("Removing problematic packages failed; continuing with the upgrade");
            return Ok(vec![]);
        }
        self.reporter.ok(&format!("Removed {}", installed.join(" ")));
        Ok(installed)
    }
}
