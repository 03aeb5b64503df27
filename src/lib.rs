//! distupgrade Library
//!
//! Core of the guided Debian-family distribution upgrader: typed apt/dpkg
//! commands, the conflict escalation policy, hardware detection for
//! single-board computers and the staged upgrade flow that ties them together.

pub mod backup;
pub mod boot;
pub mod cli;
pub mod command_runner;
pub mod command_traits;
pub mod commands;
pub mod config;
pub mod context;
pub mod desktop;
pub mod error;
pub mod escalation;
pub mod hardware;
pub mod logging;
pub mod os_release;
pub mod platform;
pub mod preflight;
pub mod process_guard;
pub mod prompt;
pub mod report;
pub mod upgrade;
pub mod upgrade_state;
pub mod verify;

// Re-export main types for convenience
pub use command_runner::{CommandOutput, CommandRunner, SystemRunner};
pub use command_traits::PackageCommand;
pub use config::{CompiledRule, ConflictRule, RebootPolicy, Remedy, UpgradeConfig};
pub use context::{Profile, RunContext};
pub use error::{Result, UpgradeError};
pub use escalation::{AttemptRecord, Escalation, EscalationOutcome, StopReason};
pub use hardware::HardwareFacts;
pub use os_release::OsRelease;
pub use process_guard::{ChildRegistry, CommandProcessGroup};
pub use prompt::{AssumeYes, Prompter, StdinPrompter};
pub use report::{FinalReport, Reporter};
pub use upgrade::{UpgradeSummary, Upgrader};
pub use upgrade_state::{StageTransitionError, UpgradeStage, UpgradeTracker};
