//! Identity of the machine running the upload tool.

use std::env::consts::{ARCH, OS};

/// Operating system and architecture, as named by the board toolchain.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Host {
    /// Platform identifier used in `cmd.<os>` keys.
    pub os: String,
    /// Whether the upload tool needs its ARM build.
    pub arm: bool,
}

impl Host {
    /// The host `flasher` is running on.
    pub fn current() -> Self {
        Self::new(OS, ARCH)
    }

    /// Build a host from Rust's `target_os` and `target_arch` names.
    pub fn new(os: &str, arch: &str) -> Self {
        let os = match os {
            // Toolchains have always called it that.
            "macos" | "darwin" => "macosx",
            other => other,
        };
        Host {
            os: os.to_owned(),
            arm: arch == "arm" || arch == "aarch64",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macos_is_renamed() {
        assert_eq!(Host::new("macos", "x86_64").os, "macosx");
    }

    #[test]
    fn other_systems_pass_through() {
        assert_eq!(Host::new("linux", "x86_64").os, "linux");
        assert_eq!(Host::new("windows", "x86").os, "windows");
    }

    #[test]
    fn arm_detection() {
        assert!(Host::new("linux", "arm").arm);
        assert!(Host::new("linux", "aarch64").arm);
        assert!(!Host::new("linux", "x86_64").arm);
    }
}
