//! Upgrade configuration: package lists and the conflict rule table.
//!
//! The built-in defaults reproduce the fixed lists the upgrader always
//! shipped with. A JSON file passed with `--config` replaces them, so a new
//! conflict class is a new entry in `conflict_rules` rather than a code
//! change. Fields missing from the file keep their default value.

use crate::error::{Result, UpgradeError};
use regex::RegexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use strum::{Display, EnumIter, EnumString};

/// What to do about rebooting after a successful upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[derive(Display, EnumString, EnumIter)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RebootPolicy {
    /// Prompt the operator.
    #[default]
    Ask,
    /// Reboot without asking.
    Auto,
    /// Never reboot; just advise it.
    Never,
}

/// Remedial action run before retrying a failed upgrade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Remedy {
    /// Retry only, possibly with different flags.
    None,
    /// `apt-get -f install`.
    FixBroken,
    /// `dpkg --configure -a`.
    ConfigurePending,
    /// Purge the listed packages (only those actually installed).
    RemovePackages { packages: Vec<String> },
}

/// One escalation tier: when the captured output of a failed upgrade
/// matches any of `patterns`, run `remedy` and retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRule {
    pub name: String,
    /// Regular expressions matched against combined stdout and stderr.
    pub patterns: Vec<String>,
    pub remedy: Remedy,
    /// Retry with `--force-overwrite`. Once any applied rule sets it, every
    /// later retry keeps it.
    #[serde(default)]
    pub force_overwrite: bool,
}

impl ConflictRule {
    pub fn new(name: &str, patterns: &[&str], remedy: Remedy, force_overwrite: bool) -> Self {
        Self {
            name: name.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            remedy,
            force_overwrite,
        }
    }

    /// Rule for dpkg refusing to unpack a file another package owns.
    pub fn file_overwrite() -> Self {
        Self::new("file-overwrite", &["trying to overwrite"], Remedy::None, true)
    }

    /// Rule for dependency failures: repair, then retry overwrite-forced.
    pub fn unmet_dependencies() -> Self {
        Self::new(
            "unmet-dependencies",
            &["Unmet dependencies", "Depends:"],
            Remedy::FixBroken,
            true,
        )
    }

    /// Rule for a desktop framework transition: drop the old framework's
    /// packages, then retry overwrite-forced.
    pub fn framework_transition(packages: &[String]) -> Self {
        Self::new(
            "framework-transition",
            &["Breaks:", "Conflicts:", "held broken packages", "trying to overwrite"],
            Remedy::RemovePackages {
                packages: packages.to_vec(),
            },
            true,
        )
    }
}

/// A rule with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub rule: ConflictRule,
    set: RegexSet,
}

impl CompiledRule {
    pub fn compile(rule: &ConflictRule) -> Result<Self> {
        let set = RegexSet::new(&rule.patterns)?;
        Ok(Self {
            rule: rule.clone(),
            set,
        })
    }

    pub fn name(&self) -> &str {
        &self.rule.name
    }

    pub fn matches(&self, output: &str) -> bool {
        self.set.is_match(output)
    }
}

/// Packages whose presence is known to block release upgrades.
const DEFAULT_PROBLEMATIC: &[&str] = &[
    "ureadahead",
    "update-notifier-common",
    "backport-iwlwifi-dkms",
    "ttf-mscorefonts-installer",
    "chromium-browser-l10n",
];

/// Plasma 5 / KDE Frameworks 5 packages that conflict with the Plasma 6 stack.
const DEFAULT_TRANSITION: &[&str] = &[
    "plasma-framework",
    "libkf5plasma5",
    "libkf5plasmaquick5",
    "plasma-workspace-wayland",
    "plasma-widgets-addons",
    "kde-config-screenlocker",
    "kwin-wayland-backend-drm",
];

/// Packages whose major version marks the desktop framework generation.
const DEFAULT_DESKTOP_PROBES: &[&str] = &["plasma-workspace", "plasma-desktop"];

fn owned(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Complete upgrade configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpgradeConfig {
    /// Removed (on confirmation) before the upgrade when installed.
    pub problematic_packages: Vec<String>,
    /// Removed when a desktop framework transition blocks the upgrade.
    pub transition_packages: Vec<String>,
    /// Escalation tiers, tried in order after the plain upgrade fails.
    pub conflict_rules: Vec<ConflictRule>,
    pub desktop_probe_packages: Vec<String>,
    pub sources_list: PathBuf,
    pub sources_dir: PathBuf,
    pub backup_root: PathBuf,
    pub log_dir: PathBuf,
    pub min_free_space_mb: u64,
    pub reboot: RebootPolicy,
}

impl Default for UpgradeConfig {
    fn default() -> Self {
        Self {
            problematic_packages: owned(DEFAULT_PROBLEMATIC),
            transition_packages: owned(DEFAULT_TRANSITION),
            conflict_rules: vec![
                ConflictRule::file_overwrite(),
                ConflictRule::unmet_dependencies(),
            ],
            desktop_probe_packages: owned(DEFAULT_DESKTOP_PROBES),
            sources_list: PathBuf::from("/etc/apt/sources.list"),
            sources_dir: PathBuf::from("/etc/apt/sources.list.d"),
            backup_root: PathBuf::from("/root"),
            log_dir: PathBuf::from("/var/log/distupgrade"),
            min_free_space_mb: 2048,
            reboot: RebootPolicy::Ask,
        }
    }
}

/// Debian package name: lowercase alphanumerics plus `+ - .`, at least two
/// characters, starting with an alphanumeric.
pub fn is_valid_package_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() >= 2
        && (first.is_ascii_lowercase() || first.is_ascii_digit())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "+-.".contains(c))
}

impl UpgradeConfig {
    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json)?;
        Ok(())
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).map_err(|e| {
            UpgradeError::config(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        for name in self
            .problematic_packages
            .iter()
            .chain(&self.transition_packages)
            .chain(&self.desktop_probe_packages)
        {
            if !is_valid_package_name(name) {
                return Err(UpgradeError::config(format!(
                    "invalid package name '{}'",
                    name
                )));
            }
        }

        let mut seen = HashSet::new();
        for rule in &self.conflict_rules {
            if rule.name.trim().is_empty() {
                return Err(UpgradeError::config("conflict rule name is empty"));
            }
            if !seen.insert(rule.name.as_str()) {
                return Err(UpgradeError::config(format!(
                    "duplicate conflict rule '{}'",
                    rule.name
                )));
            }
            if rule.patterns.is_empty() {
                return Err(UpgradeError::config(format!(
                    "conflict rule '{}' has no patterns",
                    rule.name
                )));
            }
            if let Remedy::RemovePackages { packages } = &rule.remedy {
                if packages.is_empty() {
                    return Err(UpgradeError::config(format!(
                        "conflict rule '{}' removes an empty package list",
                        rule.name
                    )));
                }
                if let Some(bad) = packages.iter().find(|p| !is_valid_package_name(p)) {
                    return Err(UpgradeError::config(format!(
                        "conflict rule '{}' has invalid package name '{}'",
                        rule.name, bad
                    )));
                }
            }
            CompiledRule::compile(rule).map_err(|e| {
                UpgradeError::config(format!("conflict rule '{}': {}", rule.name, e))
            })?;
        }

        if self.min_free_space_mb == 0 {
            return Err(UpgradeError::config("min_free_space_mb must be positive"));
        }

        Ok(())
    }

    /// Compile the conflict rules in order.
    pub fn compile_rules(&self) -> Result<Vec<CompiledRule>> {
        self.conflict_rules.iter().map(CompiledRule::compile).collect()
    }
}
