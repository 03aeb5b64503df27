//! Error handling module for distupgrade
//!
//! Provides centralized error handling with proper error types using thiserror.
//! Library code returns these; `main` converts them to exit codes.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for distupgrade
#[derive(Error, Debug)]
pub enum UpgradeError {
    /// IO errors (log files, backups, /proc reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors (loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking precondition failed (not root, package manager busy, ...)
    #[error("Preflight check failed: {0}")]
    Preflight(String),

    /// An external command could not be spawned or failed where failure is fatal
    #[error("Command failed: {0}")]
    Command(String),

    /// The operator declined a confirmation prompt
    #[error("Aborted by operator: {0}")]
    Aborted(String),

    /// Every escalation tier was tried and the upgrade still failed
    #[error("Upgrade failed after {attempts} attempt(s); see log at {}", log.display())]
    UpgradeFailed { attempts: usize, log: PathBuf },

    /// Hardware detection errors
    #[error("Hardware detection error: {0}")]
    Hardware(String),

    /// Upgrade stage machine transition errors
    #[error("Stage transition error: {0}")]
    Transition(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid conflict pattern
    #[error("Pattern error: {0}")]
    Pattern(#[from] regex::Error),
}

/// Result type alias for distupgrade operations
pub type Result<T> = std::result::Result<T, UpgradeError>;

// Convenient error constructors
impl UpgradeError {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a preflight error
    pub fn preflight(msg: impl Into<String>) -> Self {
        Self::Preflight(msg.into())
    }

    /// Create a command error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create an aborted error
    pub fn aborted(msg: impl Into<String>) -> Self {
        Self::Aborted(msg.into())
    }

    /// Create a hardware error
    pub fn hardware(msg: impl Into<String>) -> Self {
        Self::Hardware(msg.into())
    }

    /// Create a stage transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Process exit code for this error.
    ///
    /// Every error is non-zero; the distinct codes let wrapper scripts tell
    /// an operator abort apart from a failed upgrade.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Aborted(_) => 2,
            Self::Preflight(_) => 3,
            Self::UpgradeFailed { .. } => 4,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = UpgradeError::config("rule name is empty");
        assert_eq!(err.to_string(), "Configuration error: rule name is empty");

        let err = UpgradeError::aborted("declined upgrade");
        assert_eq!(err.to_string(), "Aborted by operator: declined upgrade");
    }

    #[test]
    fn test_upgrade_failed_mentions_log() {
        let err = UpgradeError::UpgradeFailed {
            attempts: 3,
            log: PathBuf::from("/var/log/distupgrade-x.log"),
        };
        let text = err.to_string();
        assert!(text.contains("3 attempt(s)"));
        assert!(text.contains("/var/log/distupgrade-x.log"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: UpgradeError = io_err.into();
        assert!(matches!(err, UpgradeError::Io(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let codes = [
            UpgradeError::aborted("x").exit_code(),
            UpgradeError::preflight("x").exit_code(),
            UpgradeError::UpgradeFailed {
                attempts: 1,
                log: PathBuf::new(),
            }
            .exit_code(),
            UpgradeError::command("x").exit_code(),
        ];
        assert!(codes.iter().all(|&c| c != 0));
        assert_eq!(codes, [2, 3, 4, 1]);
    }
}
