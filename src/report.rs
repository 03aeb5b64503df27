//! Operator-facing output and the final upgrade report.
//!
//! [`Reporter`] prints ASCII status lines with colored tags and mirrors each
//! one as a tracing event, so the run log carries the same transcript the
//! operator saw. [`FinalReport`] is the plain-text summary written at the end
//! of a hardware-aware run.

use crate::backup::BackupManifest;
use crate::boot::BootCheckReport;
use crate::escalation::EscalationOutcome;
use crate::hardware::HardwareFacts;
use crate::logging::OPERATOR_TARGET;
use crate::os_release::OsRelease;
use crate::platform::PlatformReport;
use crate::verify::VerificationReport;
use owo_colors::OwoColorize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{error, info, warn};

pub const SEPARATOR: &str = "==================================================================";

/// Console status lines.
#[derive(Debug, Clone, Default)]
pub struct Reporter {
    quiet: bool,
}

impl Reporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log only; nothing on the console. Used by tests.
    pub fn quiet() -> Self {
        Self { quiet: true }
    }

    pub fn header(&self, title: &str) {
        info!(target: OPERATOR_TARGET, "== {} ==", title);
        if !self.quiet {
            println!();
            println!("{}", title.bold().cyan());
            println!("{}", SEPARATOR.dimmed());
        }
    }

    pub fn info(&self, message: &str) {
        info!(target: OPERATOR_TARGET, "{}", message);
        if !self.quiet {
            println!("[INFO] {}", message);
        }
    }

    pub fn ok(&self, message: &str) {
        info!(target: OPERATOR_TARGET, "OK: {}", message);
        if !self.quiet {
            println!("{} {}", "[ OK ]".green(), message);
        }
    }

    pub fn warn(&self, message: &str) {
        warn!(target: OPERATOR_TARGET, "{}", message);
        if !self.quiet {
            println!("{} {}", "[WARN]".yellow(), message.yellow());
        }
    }

    pub fn fail(&self, message: &str) {
        error!(target: OPERATOR_TARGET, "{}", message);
        if !self.quiet {
            eprintln!("{} {}", "[FAIL]".bright_red().bold(), message.red());
        }
    }
}

/// Text summary of a finished run.
#[derive(Debug, Clone, Default)]
pub struct FinalReport {
    pub started: String,
    pub os_before: OsRelease,
    pub os_after: Option<OsRelease>,
    pub kernel: String,
    pub hardware: Option<HardwareFacts>,
    pub platform: Option<PlatformReport>,
    pub backup: Option<BackupManifest>,
    pub removed_packages: Vec<String>,
    pub escalation: Option<EscalationOutcome>,
    pub verification: Option<VerificationReport>,
    pub boot: Option<BootCheckReport>,
    pub log_file: Option<String>,
}

impl FinalReport {
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "distupgrade report");
        let _ = writeln!(out, "{}", SEPARATOR);
        let _ = writeln!(out, "Started:        {}", self.started);
        let _ = writeln!(out, "OS before:      {}", self.os_before);
        if let Some(after) = &self.os_after {
            let _ = writeln!(out, "OS after:       {}", after);
        }
        let _ = writeln!(out, "Kernel:         {}", self.kernel);
        if let Some(log) = &self.log_file {
            let _ = writeln!(out, "Log file:       {}", log);
        }

        if let Some(hw) = &self.hardware {
            let _ = writeln!(out, "\nHardware");
            for line in hw.to_lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }

        if let Some(platform) = &self.platform {
            let _ = writeln!(out, "\nPlatform checks");
            for line in platform.to_lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }

        if let Some(backup) = &self.backup {
            let _ = writeln!(out, "\nBackup");
            let _ = writeln!(out, "  Directory: {}", backup.dir.display());
            for file in &backup.files {
                let _ = writeln!(out, "  - {}", file.display());
            }
        }

        if !self.removed_packages.is_empty() {
            let _ = writeln!(out, "\nRemoved before upgrade");
            let _ = writeln!(out, "  {}", self.removed_packages.join(" "));
        }

        if let Some(outcome) = &self.escalation {
            let _ = writeln!(out, "\nUpgrade");
            let _ = writeln!(out, "  Result: {}", outcome.stop);
            for attempt in &outcome.attempts {
                let _ = writeln!(out, "  {}", attempt);
            }
            for remedy in &outcome.remedies {
                let _ = writeln!(out, "  remedy: {}", remedy);
            }
        }

        if let Some(verification) = &self.verification {
            let _ = writeln!(out, "\nVerification");
            for line in verification.to_lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }

        if let Some(boot) = &self.boot {
            let _ = writeln!(out, "\nBoot");
            for line in boot.to_lines() {
                let _ = writeln!(out, "  {}", line);
            }
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())
    }
}
