use crate::config::RebootPolicy;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// distupgrade - guided Debian/Ubuntu distribution upgrades
#[derive(Parser, Debug)]
#[command(name = "distupgrade")]
#[command(about = "Guided apt distribution upgrade with conflict escalation and SBC checks")]
#[command(version)]
pub struct Cli {
    /// Dry-run mode: show what would be executed without making changes.
    ///
    /// Mutating commands (update, purge, full-upgrade, update-grub, reboot)
    /// are logged and skipped. Read-only queries still run so the checks
    /// reflect the real system.
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Answer yes to every prompt
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// JSON configuration file (package lists and conflict rules)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory for run logs and reports
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Reboot behaviour after a successful upgrade
    #[arg(long, global = true)]
    pub reboot: Option<RebootPolicy>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the generic upgrader (default)
    Upgrade,
    /// Run the hardware-aware upgrader for single-board computers
    Sbc,
    /// Print detected hardware and OS release, then exit
    Detect,
    /// Validate a configuration file
    Validate {
        /// Path to configuration file to validate
        file: PathBuf,
    },
    /// Print the built-in configuration as JSON
    DumpConfig,
}

impl Cli {
    pub fn parse_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    /// The subcommand to run; `upgrade` when none was given.
    pub fn command(&self) -> Commands {
        self.command.clone().unwrap_or(Commands::Upgrade)
    }
}
