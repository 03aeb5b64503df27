//! Typed contracts for external commands.
//!
//! Every external program distupgrade runs is described by a struct that
//! implements [`PackageCommand`]. The struct is the single source of truth for
//! the program name, its flags and its environment, so a typo in
//! `--force-overwrite` is a compile error in one place rather than a string
//! scattered across phases.
//!
//! The trait also records whether a command changes the system. Dry-run mode
//! and the "decline means nothing mutating ran" guarantee both key off
//! [`PackageCommand::is_mutating`].

/// Trait for typed external commands.
///
/// # Contract
///
/// - `program()`: executable name, resolved through `PATH`.
/// - `to_cli_args()`: arguments exactly as the program expects them.
/// - `get_env_vars()`: extra environment for the child. Defaults to the C
///   locale, since conflict rules and parsers match English output.
/// - `is_mutating()`: true if running it can change installed packages,
///   configuration or boot state.
///
/// # Example
///
/// ```
/// use distupgrade::command_traits::PackageCommand;
/// use distupgrade::commands::apt::AptFullUpgrade;
///
/// let cmd = AptFullUpgrade { force_overwrite: true };
/// assert_eq!(cmd.program(), "apt-get");
/// assert!(cmd.to_cli_args().iter().any(|a| a == "Dpkg::Options::=--force-overwrite"));
/// ```
pub trait PackageCommand {
    /// Executable name.
    fn program(&self) -> &'static str;

    /// Arguments passed to the program.
    fn to_cli_args(&self) -> Vec<String>;

    /// Environment variables the program needs.
    fn get_env_vars(&self) -> Vec<(String, String)> {
        c_locale_env()
    }

    /// Whether the command changes system state.
    fn is_mutating(&self) -> bool;

    /// Human-readable command line, used for logging and dry-run output.
    fn display(&self) -> String {
        let args = self.to_cli_args();
        if args.is_empty() {
            self.program().to_string()
        } else {
            format!("{} {}", self.program(), args.join(" "))
        }
    }
}

/// Untranslated messages, so "trying to overwrite" or "Candidate:" appear
/// verbatim whatever the operator's `LANG` is.
pub(crate) fn c_locale_env() -> Vec<(String, String)> {
    vec![("LC_ALL".to_string(), "C".to_string())]
}

/// Environment shared by every mutating apt/dpkg invocation: no debconf
/// dialogs, no apt-listchanges pager, C locale.
pub(crate) fn noninteractive_env() -> Vec<(String, String)> {
    let mut env = vec![
        ("DEBIAN_FRONTEND".to_string(), "noninteractive".to_string()),
        ("APT_LISTCHANGES_FRONTEND".to_string(), "none".to_string()),
    ];
    env.extend(c_locale_env());
    env
}
