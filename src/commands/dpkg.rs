//! Type-safe dpkg / dpkg-query commands and their output parsers.

use crate::command_traits::{noninteractive_env, PackageCommand};

// ============================================================================
// dpkg --configure -a
// ============================================================================

/// `dpkg --configure -a`: finish configuring unpacked packages.
#[derive(Debug, Clone, Default)]
pub struct DpkgConfigurePending;

impl PackageCommand for DpkgConfigurePending {
    fn program(&self) -> &'static str {
        "dpkg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--force-confdef".to_string(),
            "--force-confold".to_string(),
            "--configure".to_string(),
            "-a".to_string(),
        ]
    }

    fn get_env_vars(&self) -> Vec<(String, String)> {
        noninteractive_env()
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

// ============================================================================
// Read-only queries
// ============================================================================

/// `dpkg --audit`: prints nothing when the database is consistent.
#[derive(Debug, Clone, Default)]
pub struct DpkgAudit;

impl PackageCommand for DpkgAudit {
    fn program(&self) -> &'static str {
        "dpkg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--audit".to_string()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `dpkg --get-selections`: snapshot for the backup directory.
#[derive(Debug, Clone, Default)]
pub struct DpkgGetSelections;

impl PackageCommand for DpkgGetSelections {
    fn program(&self) -> &'static str {
        "dpkg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["--get-selections".to_string()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `dpkg-query -W` over one or more package name patterns.
///
/// Exits 1 if any pattern matched nothing, while still printing the matches,
/// so callers parse stdout regardless of the exit code.
#[derive(Debug, Clone)]
pub struct DpkgQueryInstalled {
    pub patterns: Vec<String>,
}

impl DpkgQueryInstalled {
    pub fn one(package: impl Into<String>) -> Self {
        Self {
            patterns: vec![package.into()],
        }
    }
}

impl PackageCommand for DpkgQueryInstalled {
    fn program(&self) -> &'static str {
        "dpkg-query"
    }

    fn to_cli_args(&self) -> Vec<String> {
        let mut args = vec![
            "-W".to_string(),
            "-f=${Package}\\t${db:Status-Status}\\t${Version}\\n".to_string(),
        ];
        args.extend(self.patterns.iter().cloned());
        args
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `dpkg-query -W -f=${Version}` for a single package.
///
/// Prints the version recorded in the dpkg database, which may belong to a
/// removed package whose config files remain.
#[derive(Debug, Clone)]
pub struct DpkgQueryVersion {
    pub package: String,
}

impl PackageCommand for DpkgQueryVersion {
    fn program(&self) -> &'static str {
        "dpkg-query"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-W".to_string(),
            "-f=${Version}".to_string(),
            self.package.clone(),
        ]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// One row of [`DpkgQueryInstalled`] output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    pub name: String,
    pub version: String,
}

/// Parse `DpkgQueryInstalled` output, keeping only fully installed packages.
///
/// Rows in `config-files` or `not-installed` state are dropped.
pub fn parse_installed(output: &str) -> Vec<InstalledPackage> {
    output
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let name = fields.next()?.trim();
            let status = fields.next()?.trim();
            let version = fields.next().unwrap_or("").trim();
            (status == "installed" && !name.is_empty()).then(|| InstalledPackage {
                name: name.to_string(),
                version: version.to_string(),
            })
        })
        .collect()
}

/// Upstream major version of a Debian version string.
///
/// Strips the epoch (`4:`) and returns the leading digits:
/// `4:5.27.10-1` gives 5, `6.3.4-2` gives 6.
pub fn upstream_major(version: &str) -> Option<u32> {
    let without_epoch = match version.split_once(':') {
        Some((epoch, rest)) if epoch.chars().all(|c| c.is_ascii_digit()) => rest,
        _ => version,
    };
    let digits: String = without_epoch
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}
