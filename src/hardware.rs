//! Hardware detection for single-board computers.
//!
//! Reads board, SoC, GPU and boot-medium facts from device-tree, sysfs and
//! procfs. Nothing here runs a command or changes the system; the facts are
//! informational and end up in the hardware log and the final report.
//!
//! # Design
//!
//! - Every function takes a `root` path (normally `/`) so tests can point it
//!   at a temporary tree.
//! - Missing files are not errors: a fact that can't be read is `None` or
//!   `Unknown`, and detection never fails.

use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use strum::Display;
use tracing::{debug, info};

fn read_at(root: &Path, rel: &str) -> Option<String> {
    fs::read_to_string(root.join(rel)).ok()
}

/// Device-tree strings are NUL-terminated; lists are NUL-separated.
fn dt_strings(raw: &str) -> Vec<String> {
    raw.split('\0')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Board and SoC
// ============================================================================

/// SoC vendor, derived from the device-tree `compatible` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum SocVendor {
    Rockchip,
    Allwinner,
    Amlogic,
    Broadcom,
    Qualcomm,
    Nvidia,
    Other,
    Unknown,
}

impl SocVendor {
    fn from_compatible(entry: &str) -> Self {
        match entry.split(',').next().unwrap_or("") {
            "rockchip" => Self::Rockchip,
            "allwinner" => Self::Allwinner,
            "amlogic" => Self::Amlogic,
            "brcm" | "raspberrypi" => Self::Broadcom,
            "qcom" => Self::Qualcomm,
            "nvidia" => Self::Nvidia,
            "" => Self::Unknown,
            _ => Self::Other,
        }
    }
}

/// SoC identity from `/proc/device-tree/compatible`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SocInfo {
    pub vendor: SocVendor,
    /// SoC part, e.g. `rk3588` or `bcm2711`.
    pub family: Option<String>,
    pub compatible: Vec<String>,
}

impl SocInfo {
    /// The most generic `compatible` entry (the last one) names the SoC;
    /// earlier entries name the board.
    pub fn from_compatible(compatible: Vec<String>) -> Self {
        let soc_entry = compatible.last().cloned();
        let vendor = soc_entry
            .as_deref()
            .map(SocVendor::from_compatible)
            .unwrap_or(SocVendor::Unknown);
        let family = soc_entry
            .as_deref()
            .and_then(|e| e.split_once(','))
            .map(|(_, part)| part.to_string());
        Self {
            vendor,
            family,
            compatible,
        }
    }

    pub fn unknown() -> Self {
        Self {
            vendor: SocVendor::Unknown,
            family: None,
            compatible: vec![],
        }
    }
}

/// Board model string. Device tree first, then DMI for x86 boxes.
pub fn detect_board_model(root: &Path) -> Option<String> {
    ["proc/device-tree/model", "sys/firmware/devicetree/base/model"]
        .iter()
        .find_map(|rel| read_at(root, rel))
        .and_then(|raw| dt_strings(&raw).into_iter().next())
        .or_else(|| {
            read_at(root, "sys/class/dmi/id/product_name")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

pub fn detect_soc(root: &Path) -> SocInfo {
    ["proc/device-tree/compatible", "sys/firmware/devicetree/base/compatible"]
        .iter()
        .find_map(|rel| read_at(root, rel))
        .map(|raw| SocInfo::from_compatible(dt_strings(&raw)))
        .unwrap_or_else(SocInfo::unknown)
}

// ============================================================================
// GPU
// ============================================================================

/// GPU family, classified from the kernel DRM driver name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
pub enum GpuKind {
    Mali,
    VideoCore,
    Vivante,
    Adreno,
    Amd,
    Intel,
    Nvidia,
    Other,
    None,
}

impl GpuKind {
    pub fn from_driver(driver: &str) -> Self {
        match driver {
            "panfrost" | "panthor" | "lima" | "mali" => Self::Mali,
            "vc4" | "v3d" => Self::VideoCore,
            "etnaviv" => Self::Vivante,
            "msm" => Self::Adreno,
            "amdgpu" | "radeon" => Self::Amd,
            "i915" | "xe" => Self::Intel,
            "nouveau" | "nvidia" | "tegra" => Self::Nvidia,
            _ => Self::Other,
        }
    }

    /// GPU family a device-tree `compatible` list implies, for boards where
    /// no DRM driver has bound yet.
    pub fn from_compatible(compatible: &[String]) -> Option<Self> {
        compatible.iter().rev().find_map(|entry| {
            let (vendor, part) = entry.split_once(',')?;
            match vendor {
                "rockchip" | "allwinner" | "amlogic" => Some(Self::Mali),
                "brcm" if part.starts_with("bcm27") || part == "bcm2835" => Some(Self::VideoCore),
                "qcom" => Some(Self::Adreno),
                "fsl" if part.starts_with("imx") => Some(Self::Vivante),
                "nvidia" if part.starts_with("tegra") => Some(Self::Nvidia),
                _ => None,
            }
        })
    }

    /// Kernel modules that drive this GPU family.
    pub fn kernel_modules(self) -> &'static [&'static str] {
        match self {
            Self::Mali => &["panfrost", "panthor", "lima", "mali_kbase"],
            Self::VideoCore => &["vc4", "v3d"],
            Self::Vivante => &["etnaviv"],
            Self::Adreno => &["msm"],
            Self::Amd => &["amdgpu", "radeon"],
            Self::Intel => &["i915", "xe"],
            Self::Nvidia => &["nouveau", "nvidia", "tegra_drm"],
            Self::Other | Self::None => &[],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GpuInfo {
    pub kind: GpuKind,
    /// DRM driver names, one per card that has a bound driver.
    pub drivers: Vec<String>,
    /// False when `kind` comes only from the device tree and no DRM card
    /// is driven by it.
    pub driver_bound: bool,
}

/// Resolve `sys/class/drm/card*/device/driver` symlinks to driver names,
/// falling back to the SoC's `compatible` hint when none names a GPU.
pub fn detect_gpu(root: &Path, soc: &SocInfo) -> GpuInfo {
    let drm = root.join("sys/class/drm");
    let mut drivers = Vec::new();

    if let Ok(entries) = fs::read_dir(&drm) {
        let mut cards: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("card") && !n.contains('-'))
                    .unwrap_or(false)
            })
            .collect();
        cards.sort();

        for card in cards {
            let link = card.join("device/driver");
            if let Ok(target) = fs::read_link(&link) {
                if let Some(name) = target.file_name().and_then(|n| n.to_str()) {
                    if !drivers.iter().any(|d| d == name) {
                        drivers.push(name.to_string());
                    }
                }
            }
        }
    }

    // Display-only drivers (rockchip-drm, sun4i-drm, meson-drm) sit on card0
    // while the render GPU is a separate card, so prefer a known GPU driver.
    let bound = drivers
        .iter()
        .map(|d| GpuKind::from_driver(d))
        .find(|k| *k != GpuKind::Other);

    let (kind, driver_bound) = match (bound, GpuKind::from_compatible(&soc.compatible)) {
        (Some(kind), _) => (kind, true),
        (None, Some(hint)) => {
            debug!("No DRM driver bound; device tree suggests {}", hint);
            (hint, false)
        }
        (None, None) if drivers.is_empty() => (GpuKind::None, false),
        (None, None) => (GpuKind::Other, true),
    };

    debug!("GPU drivers found: {:?}", drivers);
    GpuInfo {
        kind,
        drivers,
        driver_bound,
    }
}

/// Names of currently loaded kernel modules from `/proc/modules`.
pub fn loaded_modules(root: &Path) -> Vec<String> {
    read_at(root, "proc/modules")
        .map(|content| {
            content
                .lines()
                .filter_map(|l| l.split_whitespace().next())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Boot medium
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum BootMedium {
    SdCard(String),
    Emmc(String),
    Nvme(String),
    /// `sdX`: USB mass storage or SATA.
    UsbOrSata(String),
    Network,
    Other(String),
    Unknown,
}

impl fmt::Display for BootMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SdCard(dev) => write!(f, "SD card ({})", dev),
            Self::Emmc(dev) => write!(f, "eMMC ({})", dev),
            Self::Nvme(dev) => write!(f, "NVMe ({})", dev),
            Self::UsbOrSata(dev) => write!(f, "USB/SATA ({})", dev),
            Self::Network => write!(f, "network (NFS)"),
            Self::Other(dev) => write!(f, "other ({})", dev),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Root filesystem source from `/proc/mounts`, falling back to `root=` on
/// the kernel command line when mounts only says `/dev/root`.
pub fn root_device(root: &Path) -> Option<String> {
    let from_mounts = read_at(root, "proc/mounts").and_then(|content| {
        content.lines().find_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let fstype = fields.next().unwrap_or("");
            (target == "/" && fstype != "rootfs").then(|| source.to_string())
        })
    });

    match from_mounts {
        Some(dev) if dev != "/dev/root" => Some(dev),
        other => read_at(root, "proc/cmdline")
            .and_then(|cmdline| {
                cmdline
                    .split_whitespace()
                    .find_map(|arg| arg.strip_prefix("root="))
                    .map(str::to_string)
            })
            .or(other),
    }
}

/// Strip a partition suffix: `mmcblk0p2` -> `mmcblk0`, `nvme0n1p3` ->
/// `nvme0n1`, `sda1` -> `sda`.
fn parent_disk(name: &str) -> String {
    if name.starts_with("mmcblk") || name.starts_with("nvme") {
        if let Some(idx) = name.rfind('p') {
            let (head, tail) = name.split_at(idx);
            if tail.len() > 1 && tail[1..].chars().all(|c| c.is_ascii_digit()) {
                return head.to_string();
            }
        }
        return name.to_string();
    }
    name.trim_end_matches(|c: char| c.is_ascii_digit()).to_string()
}

pub fn detect_boot_medium(root: &Path) -> BootMedium {
    let Some(source) = root_device(root) else {
        return BootMedium::Unknown;
    };

    if source.contains(":/") || source == "/dev/nfs" {
        return BootMedium::Network;
    }

    let Some(name) = source.strip_prefix("/dev/") else {
        // UUID=/PARTUUID= on the command line can't be resolved without blkid
        return BootMedium::Other(source);
    };

    let disk = parent_disk(name);
    if disk.starts_with("mmcblk") {
        // eMMC exposes hardware boot partitions; SD cards don't
        if root.join(format!("sys/block/{}boot0", disk)).exists() {
            BootMedium::Emmc(disk)
        } else {
            BootMedium::SdCard(disk)
        }
    } else if disk.starts_with("nvme") {
        BootMedium::Nvme(disk)
    } else if disk.starts_with("sd") {
        BootMedium::UsbOrSata(disk)
    } else {
        BootMedium::Other(name.to_string())
    }
}

// ============================================================================
// Armbian
// ============================================================================

/// Contents of `/etc/armbian-release`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArmbianRelease {
    pub board: Option<String>,
    pub board_name: Option<String>,
    pub branch: Option<String>,
    pub version: Option<String>,
    pub linux_family: Option<String>,
}

/// Parse `KEY=value` shell-style assignment lines, dropping quotes and comments.
pub fn parse_key_values(content: &str) -> Vec<(String, String)> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .filter_map(|l| l.split_once('='))
        .map(|(k, v)| {
            let v = v.trim();
            let v = v
                .strip_prefix('"')
                .and_then(|s| s.strip_suffix('"'))
                .or_else(|| v.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
                .unwrap_or(v);
            (k.trim().to_string(), v.to_string())
        })
        .collect()
}

pub fn detect_armbian(root: &Path) -> Option<ArmbianRelease> {
    let content = read_at(root, "etc/armbian-release")?;
    let mut release = ArmbianRelease::default();
    for (key, value) in parse_key_values(&content) {
        let slot = match key.as_str() {
            "BOARD" => &mut release.board,
            "BOARD_NAME" => &mut release.board_name,
            "BRANCH" => &mut release.branch,
            "VERSION" => &mut release.version,
            "LINUXFAMILY" => &mut release.linux_family,
            _ => continue,
        };
        *slot = Some(value);
    }
    Some(release)
}

// ============================================================================
// Aggregated facts
// ============================================================================

/// Everything detected about the hardware, for logging and the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HardwareFacts {
    pub model: Option<String>,
    pub soc: SocInfo,
    pub gpu: GpuInfo,
    pub boot: BootMedium,
    pub armbian: Option<ArmbianRelease>,
}

impl HardwareFacts {
    /// Detect everything under `root`. Never fails.
    pub fn detect(root: &Path) -> Self {
        let soc = detect_soc(root);
        let facts = Self {
            model: detect_board_model(root),
            gpu: detect_gpu(root, &soc),
            soc,
            boot: detect_boot_medium(root),
            armbian: detect_armbian(root),
        };
        info!("Hardware detection: {}", facts.summary());
        facts
    }

    /// A device tree is present: an ARM/RISC-V board rather than a PC.
    pub fn is_single_board(&self) -> bool {
        !self.soc.compatible.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "board={}, soc={}{}, gpu={}, boot={}",
            self.model.as_deref().unwrap_or("unknown"),
            self.soc.vendor,
            self.soc
                .family
                .as_deref()
                .map(|f| format!(" {}", f))
                .unwrap_or_default(),
            self.gpu.kind,
            self.boot
        )
    }

    /// Human-readable lines for the hardware log and report.
    pub fn to_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Board model:   {}", self.model.as_deref().unwrap_or("unknown")),
            format!("SoC vendor:    {}", self.soc.vendor),
            format!("SoC family:    {}", self.soc.family.as_deref().unwrap_or("unknown")),
            format!("Compatible:    {}", self.soc.compatible.join(", ")),
            format!(
                "GPU:           {} [{}]{}",
                self.gpu.kind,
                self.gpu.drivers.join(", "),
                if self.gpu.driver_bound || self.gpu.kind == GpuKind::None {
                    ""
                } else {
                    " (expected driver not bound)"
                }
            ),
            format!("Boot medium:   {}", self.boot),
        ];
        match &self.armbian {
            Some(a) => {
                lines.push(format!(
                    "Armbian:       {} {} ({} branch, {} family)",
                    a.board_name.as_deref().or(a.board.as_deref()).unwrap_or("unknown board"),
                    a.version.as_deref().unwrap_or("?"),
                    a.branch.as_deref().unwrap_or("?"),
                    a.linux_family.as_deref().unwrap_or("?"),
                ));
            }
            None => lines.push("Armbian:       no".to_string()),
        }
        lines
    }
}
