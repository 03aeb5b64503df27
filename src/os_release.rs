//! Operating system release detection from `/etc/os-release`.

use crate::hardware::parse_key_values;
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsRelease {
    pub id: Option<String>,
    /// `ID_LIKE`: space-separated ids of the distributions this one derives from.
    pub id_like: Vec<String>,
    pub version_id: Option<String>,
    pub codename: Option<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    /// Parse os-release content.
    pub fn parse(content: &str) -> Self {
        let mut release = Self::default();
        for (key, value) in parse_key_values(content) {
            if key == "ID_LIKE" {
                release.id_like = value.split_whitespace().map(str::to_string).collect();
                continue;
            }
            let slot = match key.as_str() {
                "ID" => &mut release.id,
                "VERSION_ID" => &mut release.version_id,
                "VERSION_CODENAME" => &mut release.codename,
                "PRETTY_NAME" => &mut release.pretty_name,
                _ => continue,
            };
            if !value.is_empty() {
                *slot = Some(value);
            }
        }
        // Older Ubuntu releases only set UBUNTU_CODENAME
        if release.codename.is_none() {
            release.codename = parse_key_values(content)
                .into_iter()
                .find(|(k, v)| k == "UBUNTU_CODENAME" && !v.is_empty())
                .map(|(_, v)| v);
        }
        release
    }

    /// Read `<root>/etc/os-release`, falling back to `<root>/usr/lib/os-release`.
    /// An unreadable file yields an all-unknown release.
    pub fn detect(root: &Path) -> Self {
        ["etc/os-release", "usr/lib/os-release"]
            .iter()
            .find_map(|rel| fs::read_to_string(root.join(rel)).ok())
            .map(|content| Self::parse(&content))
            .unwrap_or_default()
    }

    /// Debian, Ubuntu or a derivative declaring either in `ID_LIKE`
    /// (Mint, Pop!_OS, DietPi, ...).
    pub fn is_debian_family(&self) -> bool {
        matches!(self.id.as_deref(), Some("debian" | "ubuntu" | "raspbian" | "armbian"))
            || self.id_like.iter().any(|id| id == "debian" || id == "ubuntu")
    }
}

impl fmt::Display for OsRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.pretty_name.as_deref().unwrap_or("unknown");
        match &self.codename {
            Some(codename) => write!(f, "{} [{}]", name, codename),
            None => write!(f, "{}", name),
        }
    }
}

/// Running kernel release (`uname -r`).
pub fn running_kernel() -> String {
    nix::sys::utsname::uname()
        .map(|u| u.release().to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string())
}
