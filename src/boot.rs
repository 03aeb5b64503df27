//! Bootloader, kernel and initramfs checks after the upgrade, and the reboot
//! decision.

use crate::command_runner::CommandRunner;
use crate::commands::dpkg::{parse_installed, DpkgQueryInstalled};
use crate::commands::system::{parse_failed_units, SystemctlFailed, SystemctlReboot, UpdateGrub, UpdateInitramfs};
use crate::config::RebootPolicy;
use crate::error::Result;
use crate::prompt::Prompter;
use crate::report::Reporter;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Files under `/boot` for one installed kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelState {
    pub version: String,
    pub image_present: bool,
    pub initrd_present: bool,
}

/// U-Boot script state on Armbian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UbootState {
    pub boot_script_present: bool,
    pub env_file_present: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootCheckReport {
    pub kernels: Vec<KernelState>,
    /// `update-initramfs` ran because an initrd was missing.
    pub initramfs_regenerated: bool,
    /// `None` when GRUB is not installed or the update was only simulated.
    pub grub_updated: Option<bool>,
    /// Actions skipped by dry-run mode, e.g. "regenerate initramfs".
    pub skipped: Vec<String>,
    pub uboot: Option<UbootState>,
    pub failed_units: Vec<String>,
    pub reboot_required: bool,
}

impl BootCheckReport {
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        for k in &self.kernels {
            if !k.image_present {
                warnings.push(format!("kernel {} has no image in /boot", k.version));
            } else if !k.initrd_present && !self.initramfs_regenerated {
                warnings.push(format!("kernel {} has no initrd", k.version));
            }
        }
        if self.grub_updated == Some(false) {
            warnings.push("update-grub failed".to_string());
        }
        if let Some(uboot) = &self.uboot {
            if !uboot.boot_script_present {
                warnings.push("/boot/boot.scr is missing".to_string());
            }
            if !uboot.env_file_present {
                warnings.push("/boot/armbianEnv.txt is missing".to_string());
            }
        }
        for unit in &self.failed_units {
            warnings.push(format!("failed unit: {}", unit));
        }
        warnings
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .kernels
            .iter()
            .map(|k| {
                format!(
                    "kernel {}: image {}, initrd {}",
                    k.version,
                    if k.image_present { "ok" } else { "missing" },
                    if k.initrd_present { "ok" } else { "missing" }
                )
            })
            .collect();
        if self.initramfs_regenerated {
            lines.push("initramfs regenerated".to_string());
        }
        for action in &self.skipped {
            lines.push(format!("would {} (dry run)", action));
        }
        match self.grub_updated {
            Some(true) => lines.push("GRUB configuration updated".to_string()),
            Some(false) => lines.push("GRUB update failed".to_string()),
            None => {}
        }
        if let Some(uboot) = &self.uboot {
            lines.push(format!(
                "U-Boot: boot.scr {}, armbianEnv.txt {}",
                if uboot.boot_script_present { "present" } else { "missing" },
                if uboot.env_file_present { "present" } else { "missing" }
            ));
        }
        if !self.failed_units.is_empty() {
            lines.push(format!("Failed units: {}", self.failed_units.join(", ")));
        }
        lines.push(format!(
            "Reboot: {}",
            if self.reboot_required { "required" } else { "recommended" }
        ));
        lines
    }
}

/// Versioned kernels installed according to dpkg (`linux-image-6.1.0-18-arm64`
/// gives `6.1.0-18-arm64`). Meta packages such as `linux-image-arm64` are
/// skipped.
pub fn installed_kernels(runner: &dyn CommandRunner) -> Result<Vec<String>> {
    let out = runner.run(&DpkgQueryInstalled::one("linux-image-*"))?;
    Ok(parse_installed(&out.stdout)
        .into_iter()
        .filter_map(|p| p.name.strip_prefix("linux-image-").map(str::to_string))
        .filter(|v| v.starts_with(|c: char| c.is_ascii_digit()))
        .collect())
}

/// Kernel versions with an image in `/boot` (`vmlinuz-6.1.0-rockchip64`).
///
/// Armbian ships kernels as branch packages (`linux-image-current-rockchip64`)
/// whose names carry no version, so the image files are the only reliable
/// list there.
pub fn boot_kernels(root: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(root.join("boot")) else {
        return vec![];
    };
    let mut versions: Vec<String> = entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter_map(|name| name.strip_prefix("vmlinuz-").map(str::to_string))
        .filter(|v| !v.is_empty() && !v.ends_with(".old") && !v.ends_with(".bak"))
        .collect();
    versions.sort();
    versions
}

/// dpkg kernels first, then any other image found in `/boot`.
pub fn kernel_versions(runner: &dyn CommandRunner, root: &Path) -> Result<Vec<String>> {
    let mut versions = installed_kernels(runner)?;
    for v in boot_kernels(root) {
        if !versions.contains(&v) {
            versions.push(v);
        }
    }
    Ok(versions)
}

pub fn inspect_kernels(root: &Path, versions: &[String]) -> Vec<KernelState> {
    let boot = root.join("boot");
    versions
        .iter()
        .map(|v| KernelState {
            version: v.clone(),
            image_present: boot.join(format!("vmlinuz-{}", v)).exists(),
            initrd_present: boot.join(format!("initrd.img-{}", v)).exists(),
        })
        .collect()
}

/// Check kernels, regenerate a missing initramfs, refresh GRUB, inspect the
/// U-Boot files on Armbian and list failed units.
pub fn run_boot_checks(
    runner: &dyn CommandRunner,
    root: &Path,
    armbian: bool,
) -> Result<BootCheckReport> {
    let mut report = BootCheckReport {
        kernels: inspect_kernels(root, &kernel_versions(runner, root)?),
        ..BootCheckReport::default()
    };

    if report.kernels.iter().any(|k| k.image_present && !k.initrd_present) {
        warn!("Missing initrd detected, regenerating initramfs");
        let out = runner.run(&UpdateInitramfs)?;
        if out.dry_run {
            report.skipped.push("regenerate initramfs".to_string());
        } else {
            report.initramfs_regenerated = out.success;
        }
    }

    if root.join("boot/grub/grub.cfg").exists() {
        let out = runner.run(&UpdateGrub)?;
        if out.dry_run {
            report.skipped.push("update GRUB configuration".to_string());
        } else {
            report.grub_updated = Some(out.success);
        }
    }

    if armbian {
        report.uboot = Some(UbootState {
            boot_script_present: root.join("boot/boot.scr").exists(),
            env_file_present: root.join("boot/armbianEnv.txt").exists(),
        });
    }

    let failed = runner.run(&SystemctlFailed)?;
    report.failed_units = parse_failed_units(&failed.stdout);
    report.reboot_required = root.join("var/run/reboot-required").exists()
        || root.join("run/reboot-required").exists();

    debug!("Boot checks: {:?}", report);
    Ok(report)
}

/// Apply the reboot policy. Returns whether a reboot was requested.
pub fn handle_reboot(
    runner: &dyn CommandRunner,
    prompter: &dyn Prompter,
    policy: RebootPolicy,
    reporter: &Reporter,
) -> Result<bool> {
    let reboot = match policy {
        RebootPolicy::Never => false,
        RebootPolicy::Auto => true,
        RebootPolicy::Ask => prompter.confirm("Reboot now?", false),
    };
    if !reboot {
        reporter.info("Reboot skipped; reboot manually to finish the upgrade");
        return Ok(false);
    }
    let out = runner.run(&SystemctlReboot)?;
    if out.dry_run {
        reporter.info("Dry run: would reboot now");
        return Ok(false);
    }
    out.ensure_success("systemctl reboot")?;
    info!("Reboot requested");
    reporter.info("Rebooting");
    Ok(true)
}
