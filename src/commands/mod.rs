//! Typed external commands.
//!
//! - `apt`: apt-get, apt-cache and apt-mark invocations
//! - `dpkg`: dpkg and dpkg-query invocations plus their output parsers
//! - `system`: bootloader, initramfs and systemd commands

pub mod apt;
pub mod dpkg;
pub mod system;
