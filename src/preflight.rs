//! Pre-flight checks run before anything touches the package system.
//!
//! - running with root privileges (EUID 0)
//! - package-manager binaries are present
//! - no other package manager is running
//! - enough free space for downloaded archives and unpacked packages
//!
//! The first three are blocking: the run exits non-zero before any mutating
//! command. Low disk space is a warning the operator has to confirm.
//!
//! The "no other package manager" check is best effort. apt's own lock is
//! the real guard; a process can start between this check and our first
//! apt-get call.

use crate::process_guard::CommandProcessGroup;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Binaries every upgrade run needs.
pub const REQUIRED_BINARIES: &[&str] = &["apt-get", "apt-cache", "dpkg", "dpkg-query"];

/// Process names (`/proc/<pid>/comm`, truncated to 15 chars by the kernel)
/// that hold or contend for the dpkg lock.
const PACKAGE_MANAGER_PROCESSES: &[&str] = &[
    "apt",
    "apt-get",
    "aptitude",
    "dpkg",
    "unattended-upgr",
    "packagekitd",
    "synaptic",
];

/// Filesystems the upgrade writes to.
const SPACE_CHECK_PATHS: &[&str] = &["/", "/var/cache/apt/archives"];

/// A package-manager process found running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusyProcess {
    pub pid: u32,
    pub name: String,
}

/// A filesystem below the free-space threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpaceShortfall {
    pub path: PathBuf,
    pub available_mb: u64,
    pub required_mb: u64,
}

/// Result of environment verification
#[derive(Debug, Clone, Default)]
pub struct PreflightReport {
    pub is_root: bool,
    pub missing_binaries: Vec<String>,
    pub busy_processes: Vec<BusyProcess>,
    pub low_space: Vec<SpaceShortfall>,
}

impl PreflightReport {
    /// Reasons the run must stop before doing anything.
    pub fn blocking_failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        if !self.is_root {
            failures.push("root privileges required (run with sudo)".to_string());
        }
        if !self.missing_binaries.is_empty() {
            failures.push(format!(
                "missing required binaries: {}",
                self.missing_binaries.join(", ")
            ));
        }
        for p in &self.busy_processes {
            failures.push(format!(
                "package manager already running: {} (pid {})",
                p.name, p.pid
            ));
        }
        failures
    }

    /// Non-blocking problems the operator should confirm.
    pub fn warnings(&self) -> Vec<String> {
        self.low_space
            .iter()
            .map(|s| {
                format!(
                    "only {} MB free on {} (recommended {} MB)",
                    s.available_mb,
                    s.path.display(),
                    s.required_mb
                )
            })
            .collect()
    }

    pub fn is_ok(&self) -> bool {
        self.blocking_failures().is_empty()
    }
}

/// Check if a binary is available in PATH
pub fn binary_exists(name: &str) -> bool {
    Command::new("which")
        .arg(name)
        .in_new_process_group()
        .output()
        .map(|output| output.status.success())
        .unwrap_or(false)
}

/// Check if running as root (EUID 0)
pub fn is_running_as_root() -> bool {
    nix::unistd::geteuid().is_root()
}

/// Scan `<root>/proc/*/comm` for package-manager processes, ignoring `own_pid`.
pub fn find_package_manager_processes(root: &Path, own_pid: u32) -> Vec<BusyProcess> {
    let Ok(entries) = fs::read_dir(root.join("proc")) else {
        return vec![];
    };

    let mut found: Vec<BusyProcess> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let pid: u32 = e.file_name().to_str()?.parse().ok()?;
            if pid == own_pid {
                return None;
            }
            let comm = fs::read_to_string(e.path().join("comm")).ok()?;
            let name = comm.trim();
            PACKAGE_MANAGER_PROCESSES
                .contains(&name)
                .then(|| BusyProcess {
                    pid,
                    name: name.to_string(),
                })
        })
        .collect();
    found.sort_by_key(|p| p.pid);
    found
}

/// Free space available to unprivileged writers, in MB.
pub fn available_mb(path: &Path) -> Option<u64> {
    let stat = nix::sys::statvfs::statvfs(path).ok()?;
    let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
    Some(bytes / (1024 * 1024))
}

/// Check each of `paths` that exists against `required_mb`.
pub fn check_free_space(paths: &[&Path], required_mb: u64) -> Vec<SpaceShortfall> {
    paths
        .iter()
        .filter(|p| p.exists())
        .filter_map(|p| {
            let available = available_mb(p)?;
            debug!("{}: {} MB available", p.display(), available);
            (available < required_mb).then(|| SpaceShortfall {
                path: p.to_path_buf(),
                available_mb: available,
                required_mb,
            })
        })
        .collect()
}

/// Perform all checks against the live system.
pub fn verify_environment(min_free_space_mb: u64) -> PreflightReport {
    let missing_binaries = REQUIRED_BINARIES
        .iter()
        .filter(|b| !binary_exists(b))
        .map(|b| b.to_string())
        .collect();

    let space_paths: Vec<&Path> = SPACE_CHECK_PATHS.iter().map(Path::new).collect();

    let report = PreflightReport {
        is_root: is_running_as_root(),
        missing_binaries,
        busy_processes: find_package_manager_processes(Path::new("/"), std::process::id()),
        low_space: check_free_space(&space_paths, min_free_space_mb),
    };

    if report.is_ok() {
        info!("Pre-flight checks passed");
    } else {
        for failure in report.blocking_failures() {
            warn!("Pre-flight: {}", failure);
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fake_proc(root: &Path, pid: u32, comm: &str) {
        let dir = root.join("proc").join(pid.to_string());
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("comm"), format!("{}\n", comm)).expect("write comm");
    }

    #[test]
    fn test_binary_exists_sh() {
        assert!(binary_exists("sh"));
    }

    #[test]
    fn test_binary_exists_nonexistent() {
        assert!(!binary_exists("this_binary_definitely_does_not_exist_12345"));
    }

    #[test]
    fn test_finds_package_managers() {
        let dir = tempdir().expect("tempdir");
        fake_proc(dir.path(), 1, "systemd");
        fake_proc(dir.path(), 812, "unattended-upgr");
        fake_proc(dir.path(), 4000, "dpkg");
        fake_proc(dir.path(), 4001, "apt-get");
        fs::create_dir_all(dir.path().join("proc/self")).expect("mkdir");

        let found = find_package_manager_processes(dir.path(), 4001);
        assert_eq!(
            found,
            vec![
                BusyProcess { pid: 812, name: "unattended-upgr".into() },
                BusyProcess { pid: 4000, name: "dpkg".into() },
            ]
        );
    }

    #[test]
    fn test_no_proc_means_nothing_busy() {
        let dir = tempdir().expect("tempdir");
        assert!(find_package_manager_processes(dir.path(), 1).is_empty());
    }

    #[test]
    fn test_free_space_threshold() {
        let dir = tempdir().expect("tempdir");
        let paths = [dir.path()];
        assert!(check_free_space(&paths, 1).is_empty());
        let short = check_free_space(&paths, u64::MAX);
        assert_eq!(short.len(), 1);
        assert_eq!(short[0].required_mb, u64::MAX);
    }

    #[test]
    fn test_missing_paths_are_skipped() {
        let missing = Path::new("/definitely/not/here");
        assert!(check_free_space(&[missing], u64::MAX).is_empty());
    }

    #[test]
    fn test_report_blocking_and_warnings() {
        let ok = PreflightReport {
            is_root: true,
            ..PreflightReport::default()
        };
        assert!(ok.is_ok());

        let not_root = PreflightReport::default();
        assert!(!not_root.is_ok());
        assert!(not_root.blocking_failures()[0].contains("root"));

        let busy = PreflightReport {
            is_root: true,
            busy_processes: vec![BusyProcess { pid: 7, name: "apt".into() }],
            low_space: vec![SpaceShortfall {
                path: PathBuf::from("/"),
                available_mb: 100,
                required_mb: 2048,
            }],
            ..PreflightReport::default()
        };
        assert!(!busy.is_ok());
        assert_eq!(busy.warnings().len(), 1);
        assert!(busy.warnings()[0].contains("100 MB"));
    }
}
