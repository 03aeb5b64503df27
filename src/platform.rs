//! Board-specific checks run before a hardware-aware upgrade: Armbian
//! integration, GPU driver and firmware state, desktop framework version.
//!
//! Nothing here changes the system. Findings become warnings for the
//! operator, and a detected desktop transition switches on the extra
//! conflict rule in the upgrade.

use crate::command_runner::CommandRunner;
use crate::commands::dpkg::{parse_installed, DpkgQueryInstalled, DpkgQueryVersion};
use crate::commands::system::SystemctlIsActive;
use crate::desktop::{check_desktop, find_transition, DesktopProbe};
use crate::error::Result;
use crate::hardware::{loaded_modules, ArmbianRelease, GpuInfo, GpuKind, HardwareFacts};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const ARMBIAN_SERVICES: &[&str] = &["armbian-ramlog", "armbian-zram-config", "armbian-hardware-optimize"];

const MESA_PACKAGE: &str = "libgl1-mesa-dri";

const FIRMWARE_PACKAGES: &[&str] = &[
    "armbian-firmware",
    "armbian-firmware-full",
    "firmware-linux-free",
    "firmware-misc-nonfree",
    "firmware-brcm80211",
    "raspi-firmware",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceState {
    pub unit: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArmbianCheck {
    pub release: ArmbianRelease,
    pub env_file_present: bool,
    pub services: Vec<ServiceState>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuCheck {
    pub kind: GpuKind,
    /// Whether a DRM card is driven by a `kind` driver.
    pub driver_bound: bool,
    /// Loaded modules that drive `kind`.
    pub driver_modules: Vec<String>,
    pub firmware_dir_present: bool,
    pub mesa_version: Option<String>,
    pub firmware_packages: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlatformReport {
    pub armbian: Option<ArmbianCheck>,
    pub gpu: GpuCheck,
    pub desktop: Vec<DesktopProbe>,
}

impl PlatformReport {
    pub fn transition(&self) -> Option<&DesktopProbe> {
        find_transition(&self.desktop)
    }

    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if let Some(armbian) = &self.armbian {
            if !armbian.env_file_present {
                warnings.push("Armbian system without /boot/armbianEnv.txt".to_string());
            }
        }
        let gpu = &self.gpu;
        if !gpu.kind.kernel_modules().is_empty() && gpu.driver_modules.is_empty() {
            warnings.push(format!("no {} GPU driver module is loaded", gpu.kind));
        } else if !gpu.driver_bound && gpu.kind != GpuKind::None {
            warnings.push(format!(
                "{} GPU expected from the device tree but no DRM device uses its driver",
                gpu.kind
            ));
        }
        if !gpu.firmware_dir_present {
            warnings.push("/lib/firmware is missing".to_string());
        }
        if let Some(probe) = self.transition() {
            warnings.push(format!(
                "desktop framework transition for {}: {}",
                probe.package, probe.status
            ));
        }
        warnings
    }

    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match &self.armbian {
            Some(a) => {
                lines.push(format!(
                    "armbianEnv.txt: {}",
                    if a.env_file_present { "present" } else { "missing" }
                ));
                for s in &a.services {
                    lines.push(format!(
                        "service {}: {}",
                        s.unit,
                        if s.active { "active" } else { "inactive" }
                    ));
                }
            }
            None => lines.push("Armbian: not detected".to_string()),
        }
        lines.push(format!(
            "GPU driver modules: {}",
            if self.gpu.driver_modules.is_empty() {
                "none".to_string()
            } else {
                self.gpu.driver_modules.join(", ")
            }
        ));
        lines.push(format!(
            "Mesa: {}",
            self.gpu.mesa_version.as_deref().unwrap_or("not installed")
        ));
        lines.push(format!(
            "Firmware packages: {}",
            if self.gpu.firmware_packages.is_empty() {
                "none".to_string()
            } else {
                self.gpu.firmware_packages.join(", ")
            }
        ));
        for probe in &self.desktop {
            lines.push(format!("Desktop {}: {}", probe.package, probe.status));
        }
        lines
    }
}

pub fn check_armbian(
    runner: &dyn CommandRunner,
    root: &Path,
    release: &ArmbianRelease,
) -> Result<ArmbianCheck> {
    let mut services = Vec::new();
    for unit in ARMBIAN_SERVICES {
        let out = runner.run(&SystemctlIsActive {
            unit: unit.to_string(),
        })?;
        services.push(ServiceState {
            unit: unit.to_string(),
            active: out.success,
        });
    }
    Ok(ArmbianCheck {
        release: release.clone(),
        env_file_present: root.join("boot/armbianEnv.txt").is_file(),
        services,
    })
}

pub fn check_gpu(runner: &dyn CommandRunner, root: &Path, gpu: &GpuInfo) -> Result<GpuCheck> {
    let kind = gpu.kind;
    let expected = kind.kernel_modules();
    let driver_modules: Vec<String> = loaded_modules(root)
        .into_iter()
        .filter(|m| expected.contains(&m.as_str()))
        .collect();

    let mesa = runner.run(&DpkgQueryVersion {
        package: MESA_PACKAGE.to_string(),
    })?;
    let mesa_version = Some(mesa.stdout.trim().to_string()).filter(|v| mesa.success && !v.is_empty());

    let query = runner.run(&DpkgQueryInstalled {
        patterns: FIRMWARE_PACKAGES.iter().map(|s| s.to_string()).collect(),
    })?;
    let firmware_packages = parse_installed(&query.stdout)
        .into_iter()
        .map(|p| p.name)
        .collect();

    let check = GpuCheck {
        kind,
        driver_bound: gpu.driver_bound,
        driver_modules,
        firmware_dir_present: root.join("lib/firmware").is_dir(),
        mesa_version,
        firmware_packages,
    };
    debug!("GPU check: {:?}", check);
    Ok(check)
}

/// Run every platform check for the detected hardware.
pub fn run_platform_checks(
    runner: &dyn CommandRunner,
    root: &Path,
    facts: &HardwareFacts,
    desktop_probes: &[String],
) -> Result<PlatformReport> {
    let armbian = facts
        .armbian
        .as_ref()
        .map(|release| check_armbian(runner, root, release))
        .transpose()?;
    let gpu = check_gpu(runner, root, &facts.gpu)?;
    let desktop = check_desktop(runner, desktop_probes)?;
    Ok(PlatformReport {
        armbian,
        gpu,
        desktop,
    })
}
