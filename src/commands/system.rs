//! Bootloader, initramfs and systemd commands.

use crate::command_traits::PackageCommand;

/// `update-grub`.
#[derive(Debug, Clone, Default)]
pub struct UpdateGrub;

impl PackageCommand for UpdateGrub {
    fn program(&self) -> &'static str {
        "update-grub"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

/// `update-initramfs -u -k all`.
#[derive(Debug, Clone, Default)]
pub struct UpdateInitramfs;

impl PackageCommand for UpdateInitramfs {
    fn program(&self) -> &'static str {
        "update-initramfs"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["-u".to_string(), "-k".to_string(), "all".to_string()]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

/// `systemctl is-active <unit>`; exit status 0 means active.
#[derive(Debug, Clone)]
pub struct SystemctlIsActive {
    pub unit: String,
}

impl PackageCommand for SystemctlIsActive {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["is-active".to_string(), self.unit.clone()]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `systemctl --failed`, one unit per line.
#[derive(Debug, Clone, Default)]
pub struct SystemctlFailed;

impl PackageCommand for SystemctlFailed {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "--failed".to_string(),
            "--no-legend".to_string(),
            "--plain".to_string(),
        ]
    }

    fn is_mutating(&self) -> bool {
        false
    }
}

/// `systemctl reboot`.
#[derive(Debug, Clone, Default)]
pub struct SystemctlReboot;

impl PackageCommand for SystemctlReboot {
    fn program(&self) -> &'static str {
        "systemctl"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec!["reboot".to_string()]
    }

    fn is_mutating(&self) -> bool {
        true
    }
}

/// Unit names from `systemctl --failed --no-legend --plain` output.
pub fn parse_failed_units(output: &str) -> Vec<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}
