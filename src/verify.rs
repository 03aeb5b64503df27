//! Post-upgrade cleanup and package database verification.

use crate::command_runner::CommandRunner;
use crate::commands::apt::{AptAutoremove, AptCheck, AptClean, AptMarkShowHold};
use crate::commands::dpkg::DpkgAudit;
use crate::error::Result;
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub autoremove_ok: bool,
    pub clean_ok: bool,
}

/// `apt-get autoremove --purge` then `apt-get clean`. Failures are reported,
/// never fatal: the upgrade itself already succeeded.
pub fn run_cleanup(runner: &dyn CommandRunner) -> Result<CleanupReport> {
    let autoremove = runner.run(&AptAutoremove)?;
    if !autoremove.success {
        warn!("autoremove failed with {:?}", autoremove.exit_code);
    }
    let clean = runner.run(&AptClean)?;
    if !clean.success {
        warn!("apt-get clean failed with {:?}", clean.exit_code);
    }
    Ok(CleanupReport {
        autoremove_ok: autoremove.success,
        clean_ok: clean.success,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    /// `dpkg --audit` lines; empty when the database is consistent.
    pub audit_findings: Vec<String>,
    pub apt_check_ok: bool,
    pub held_packages: Vec<String>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.audit_findings.is_empty() && self.apt_check_ok
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!(
                "dpkg --audit: {}",
                if self.audit_findings.is_empty() {
                    "clean".to_string()
                } else {
                    format!("{} finding(s)", self.audit_findings.len())
                }
            ),
            format!(
                "apt-get check: {}",
                if self.apt_check_ok { "ok" } else { "failed" }
            ),
        ];
        lines.extend(self.audit_findings.iter().map(|l| format!("  {}", l)));
        if !self.held_packages.is_empty() {
            lines.push(format!("Held packages: {}", self.held_packages.join(" ")));
        }
        lines
    }
}

pub fn run_verification(runner: &dyn CommandRunner) -> Result<VerificationReport> {
    let audit = runner.run(&DpkgAudit)?;
    let audit_findings = audit
        .stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();

    let check = runner.run(&AptCheck)?;
    let held = runner.run(&AptMarkShowHold)?;

    Ok(VerificationReport {
        audit_findings,
        apt_check_ok: check.success,
        held_packages: held
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect(),
    })
}
