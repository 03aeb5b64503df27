//! Backup of APT source configuration and the package selection list.
//!
//! One timestamped directory per run. Files are copied in once and never
//! touched again; restoring from it is a manual operator action.

use crate::command_runner::CommandRunner;
use crate::commands::dpkg::DpkgGetSelections;
use crate::config::UpgradeConfig;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// What ended up in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupManifest {
    pub dir: PathBuf,
    /// Paths inside `dir`, relative to it.
    pub files: Vec<PathBuf>,
    /// Sources that did not exist and were skipped.
    pub skipped: Vec<PathBuf>,
}

impl BackupManifest {
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Directory name for a run started at `timestamp`.
pub fn backup_dir_name(timestamp: &str) -> String {
    format!("distupgrade-backup-{}", timestamp)
}

/// Create the backup directory and fill it.
///
/// Missing source files are recorded in `skipped` and never fail the run.
/// I/O errors while copying a file that does exist are returned.
pub fn create_backup(
    runner: &dyn CommandRunner,
    config: &UpgradeConfig,
    timestamp: &str,
) -> Result<BackupManifest> {
    let dir = config.backup_root.join(backup_dir_name(timestamp));
    fs::create_dir_all(&dir)?;
    info!("Backing up APT configuration to {}", dir.display());

    let mut manifest = BackupManifest {
        dir: dir.clone(),
        files: Vec::new(),
        skipped: Vec::new(),
    };

    copy_if_present(&config.sources_list, &dir, Path::new("sources.list"), &mut manifest)?;

    match fs::read_dir(&config.sources_dir) {
        Ok(entries) => {
            let mut sources: Vec<PathBuf> = entries
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| p.is_file())
                .collect();
            sources.sort();
            if !sources.is_empty() {
                fs::create_dir_all(dir.join("sources.list.d"))?;
            }
            for source in sources {
                if let Some(name) = source.file_name() {
                    let rel = Path::new("sources.list.d").join(name);
                    copy_if_present(&source, &dir, &rel, &mut manifest)?;
                }
            }
        }
        Err(_) => {
            warn!("{} not found, skipping", config.sources_dir.display());
            manifest.skipped.push(config.sources_dir.clone());
        }
    }

    match runner.run(&DpkgGetSelections) {
        Ok(out) if out.success && !out.dry_run => {
            fs::write(dir.join("packages.list"), &out.stdout)?;
            manifest.files.push(PathBuf::from("packages.list"));
        }
        Ok(out) if out.dry_run => {}
        Ok(out) => warn!(
            "dpkg --get-selections failed ({:?}); package list not saved",
            out.exit_code
        ),
        Err(e) => warn!("Could not snapshot package selections: {}", e),
    }

    info!(
        "Backup complete: {} file(s), {} skipped",
        manifest.files.len(),
        manifest.skipped.len()
    );
    Ok(manifest)
}

fn copy_if_present(
    source: &Path,
    dir: &Path,
    rel: &Path,
    manifest: &mut BackupManifest,
) -> Result<()> {
    if !source.is_file() {
        warn!("{} not found, skipping", source.display());
        manifest.skipped.push(source.to_path_buf());
        return Ok(());
    }
    let dest = dir.join(rel);
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, &dest)?;
    manifest.files.push(rel.to_path_buf());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::CommandOutput;
    use crate::command_traits::PackageCommand;
    use tempfile::tempdir;

    struct Selections(CommandOutput);

    impl CommandRunner for Selections {
        fn run(&self, _cmd: &dyn PackageCommand) -> Result<CommandOutput> {
            Ok(self.0.clone())
        }
    }

    fn config_in(root: &Path) -> UpgradeConfig {
        UpgradeConfig {
            sources_list: root.join("etc/apt/sources.list"),
            sources_dir: root.join("etc/apt/sources.list.d"),
            backup_root: root.join("backups"),
            ..UpgradeConfig::default()
        }
    }

    #[test]
    fn test_backup_copies_sources() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        fs::create_dir_all(&config.sources_dir).expect("mkdir");
        fs::write(&config.sources_list, "deb http://deb.debian.org/debian bookworm main\n")
            .expect("write");
        fs::write(config.sources_dir.join("armbian.list"), "deb http://apt.armbian.com bookworm main\n")
            .expect("write");

        let runner = Selections(CommandOutput::ok("bash\tinstall\n"));
        let manifest = create_backup(&runner, &config, "20261017-120000").expect("backup");

        assert_eq!(
            manifest.dir,
            dir.path().join("backups/distupgrade-backup-20261017-120000")
        );
        assert_eq!(
            manifest.files,
            vec![
                PathBuf::from("sources.list"),
                PathBuf::from("sources.list.d/armbian.list"),
                PathBuf::from("packages.list"),
            ]
        );
        let copied = fs::read_to_string(manifest.dir.join("sources.list")).expect("read");
        assert!(copied.contains("bookworm"));
        assert!(manifest.skipped.is_empty());
    }

    #[test]
    fn test_missing_sources_do_not_fail() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        let runner = Selections(CommandOutput::failed(2, "dpkg: error"));

        let manifest = create_backup(&runner, &config, "20261017-120000").expect("backup");
        assert!(manifest.is_empty());
        assert_eq!(manifest.skipped.len(), 2);
        assert!(manifest.dir.is_dir());
    }

    #[test]
    fn test_non_empty_when_sources_list_exists() {
        let dir = tempdir().expect("tempdir");
        let config = config_in(dir.path());
        fs::create_dir_all(config.sources_list.parent().expect("parent")).expect("mkdir");
        fs::write(&config.sources_list, "deb x y z\n").expect("write");
        let runner = Selections(CommandOutput::skipped("dpkg --get-selections"));

        let manifest = create_backup(&runner, &config, "t").expect("backup");
        assert!(!manifest.is_empty());
        assert!(fs::read_dir(&manifest.dir).expect("read").next().is_some());
    }
}
