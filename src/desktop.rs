//! Desktop framework transition detection.
//!
//! A major-version jump of the desktop shell (Plasma 5 to 6) replaces the
//! framework libraries underneath it, and the old framework packages then
//! block `full-upgrade` with Breaks/Conflicts errors. Comparing the installed
//! and candidate major versions of a few probe packages tells us beforehand.

use crate::command_runner::CommandRunner;
use crate::commands::apt::{parse_policy_candidate, AptCachePolicy};
use crate::commands::dpkg::{parse_installed, upstream_major, DpkgQueryInstalled};
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DesktopStatus {
    NotInstalled,
    /// Installed, and the candidate keeps the same major version.
    Current { version: String },
    /// The candidate moves to a newer major version.
    Transition { from: u32, to: u32 },
}

impl fmt::Display for DesktopStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInstalled => write!(f, "not installed"),
            Self::Current { version } => write!(f, "current ({})", version),
            Self::Transition { from, to } => write!(f, "transition {} -> {}", from, to),
        }
    }
}

/// Classify one package from its installed and candidate versions.
///
/// A missing or unparseable candidate is never a transition.
pub fn classify(installed: Option<&str>, candidate: Option<&str>) -> DesktopStatus {
    let Some(installed) = installed else {
        return DesktopStatus::NotInstalled;
    };
    match (upstream_major(installed), candidate.and_then(upstream_major)) {
        (Some(from), Some(to)) if to > from => DesktopStatus::Transition { from, to },
        _ => DesktopStatus::Current {
            version: installed.to_string(),
        },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DesktopProbe {
    pub package: String,
    pub installed: Option<String>,
    pub candidate: Option<String>,
    pub status: DesktopStatus,
}

/// Query dpkg and apt-cache for one probe package.
pub fn probe_package(runner: &dyn CommandRunner, package: &str) -> Result<DesktopProbe> {
    let query = runner.run(&DpkgQueryInstalled::one(package))?;
    let installed = parse_installed(&query.stdout)
        .into_iter()
        .find(|p| p.name == package)
        .map(|p| p.version);

    let candidate = if installed.is_some() {
        let policy = runner.run(&AptCachePolicy {
            package: package.to_string(),
        })?;
        parse_policy_candidate(&policy.stdout)
    } else {
        None
    };

    let status = classify(installed.as_deref(), candidate.as_deref());
    debug!("{}: installed={:?} candidate={:?} -> {}", package, installed, candidate, status);
    Ok(DesktopProbe {
        package: package.to_string(),
        installed,
        candidate,
        status,
    })
}

/// Probe every package and report whether any of them transitions.
pub fn check_desktop(runner: &dyn CommandRunner, packages: &[String]) -> Result<Vec<DesktopProbe>> {
    packages.iter().map(|p| probe_package(runner, p)).collect()
}

/// First probe showing a framework transition, if any.
pub fn find_transition(probes: &[DesktopProbe]) -> Option<&DesktopProbe> {
    probes
        .iter()
        .find(|p| matches!(p.status, DesktopStatus::Transition { .. }))
}
