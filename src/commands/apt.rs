//! Type-safe apt-get / apt-cache / apt-mark commands.

use crate::command_traits::{noninteractive_env, PackageCommand};

/// `-o` options applied to every apt-get call that unpacks packages.
///
/// confdef/confold keep locally modified configuration files without asking.
const CONFFILE_OPTIONS: &[&str] = &[
    "-o",
    "Dpkg::Options::=--force-confdef",
    "-o",
    "Dpkg::Options::=--force-confold",
];

fn unpacking_args(verb: &[&str]) -> Vec<String> {
    let mut args = vec!["-y".to_string()];
    args.extend(CONFFILE_OPTIONS.iter().map(|s| s.to_string()));
    args.extend(verb.iter().map(|s| s.to_string()));
    args
}

// ============================================================================
// apt-get update
// ============================================================================

/// `apt-get update`: refresh the package index.
#[derive(Debug, Clone, Default)]
pub struct AptUpdate;

impl PackageCommand for AptUpdate {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["update".to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// apt-get full-upgrade
// ============================================================================

/// `apt-get full-upgrade`, optionally letting dpkg overwrite files owned by
/// other packages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AptFullUpgrade {
    pub force_overwrite: bool,
}

impl PackageCommand for AptFullUpgrade {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = unpacking_args(&[]);
        if self.force_overwrite {
            args.push("-o".to_string());
            args.push("Dpkg::Options::=--force-overwrite".to_string());
        }
        args.push("full-upgrade".to_string());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// apt-get -f install
// ============================================================================

/// `apt-get -f install`: let apt repair broken dependencies.
#[derive(Debug, Clone, Default)]
pub struct AptFixBroken;

impl PackageCommand for AptFixBroken {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        unpacking_args(&["-f", "install"])
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// apt-get purge
// ============================================================================

/// `apt-get purge <packages>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AptPurge {
    pub packages: Vec<String>,
}

impl PackageCommand for AptPurge {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "purge".to_string()];
        args.extend(self.packages.iter().cloned());
        args
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// Cleanup: autoremove / clean
// ============================================================================

/// `apt-get autoremove --purge`.
#[derive(Debug, Clone, Default)]
pub struct AptAutoremove;

impl PackageCommand for AptAutoremove {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-y".to_string(), "autoremove".to_string(), "--purge".to_string()]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

/// `apt-get clean`: drop downloaded archives.
#[derive(Debug, Clone, Default)]
pub struct AptClean;

impl PackageCommand for AptClean {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["clean".to_string()]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// Read-only queries
// ============================================================================

/// `apt-get check`: verify there are no broken dependencies.
#[derive(Debug, Clone, Default)]
pub struct AptCheck;

impl PackageCommand for AptCheck {
    fn program(&self) -> &'static str {
        "apt-get"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["check".to_string()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `apt-cache policy <package>`.
#[derive(Debug, Clone)]
pub struct AptCachePolicy {
    pub package: String,
}

impl PackageCommand for AptCachePolicy {
    fn program(&self) -> &'static str {
        "apt-cache"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["policy".to_string(), self.package.clone()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `apt-mark showhold`.
#[derive(Debug, Clone, Default)]
pub struct AptMarkShowHold;

impl PackageCommand for AptMarkShowHold {
    fn program(&self) -> &'static str {
        "apt-mark"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["showhold".to_string()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// Pull the `Candidate:` version out of `apt-cache policy` output.
///
/// Returns `None` when the package is unknown or the candidate is `(none)`.
pub fn parse_policy_candidate(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.trim().strip_prefix("Candidate:"))
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != "(none)")
        .map(str::to_string)
}
