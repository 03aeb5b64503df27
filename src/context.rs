//! Per-run context: timestamp, artifact paths, detected release, profile and
//! operator flags. Built once before any phase and never mutated.

use crate::os_release::OsRelease;
use chrono::Local;
use serde::Serialize;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Which upgrade flow runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Profile {
    /// Any Debian-family system.
    Generic,
    /// Single-board computers: hardware detection, platform checks, report.
    Sbc,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    timestamp: String,
    log_dir: PathBuf,
    os: OsRelease,
    profile: Profile,
    dry_run: bool,
    assume_yes: bool,
}

impl RunContext {
    /// Context stamped with the current local time.
    pub fn new(log_dir: &Path, os: OsRelease, profile: Profile, dry_run: bool, assume_yes: bool) -> Self {
        Self::with_timestamp(
            Local::now().format(TIMESTAMP_FORMAT).to_string(),
            log_dir,
            os,
            profile,
            dry_run,
            assume_yes,
        )
    }

    pub fn with_timestamp(
        timestamp: String,
        log_dir: &Path,
        os: OsRelease,
        profile: Profile,
        dry_run: bool,
        assume_yes: bool,
    ) -> Self {
        Self {
            timestamp,
            log_dir: log_dir.to_path_buf(),
            os,
            profile,
            dry_run,
            assume_yes,
        }
    }

    pub fn timestamp(&self) -> &str {
        &self.timestamp
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(format!("distupgrade-{}.log", self.timestamp))
    }

    pub fn hardware_log_file(&self) -> PathBuf {
        self.log_dir
            .join(format!("distupgrade-hardware-{}.log", self.timestamp))
    }

    pub fn report_file(&self) -> PathBuf {
        self.log_dir
            .join(format!("distupgrade-report-{}.txt", self.timestamp))
    }

    pub fn os(&self) -> &OsRelease {
        &self.os
    }

    pub fn profile(&self) -> Profile {
        self.profile
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn assume_yes(&self) -> bool {
        self.assume_yes
    }
}
