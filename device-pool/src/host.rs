//! Host coordinate records.
//!
//! A [`Host`] is the immutable address record of one device: who it is
//! (`device_id`), where it is (`host_name` + `port`), and what runs on it
//! ([`Platform`]). Hosts are created externally or by a back-end adapter,
//! stored by value in the inventory, and never mutated.

use std::{fmt, str::FromStr};

use faststr::FastStr;

use crate::error::ProvisioningError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Windows,
    MacOs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    X86_64,
    Aarch64,
}

/// Operating system plus architecture tag of a device, e.g. `linux/aarch64`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: Os,
    pub arch: Arch,
}

impl Platform {
    pub const fn new(os: Os, arch: Arch) -> Self {
        Self { os, arch }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let os = match self.os {
            Os::Linux => "linux",
            Os::Windows => "windows",
            Os::MacOs => "macos",
        };
        let arch = match self.arch {
            Arch::X86_64 => "x86_64",
            Arch::Aarch64 => "aarch64",
        };
        write!(f, "{os}/{arch}")
    }
}

impl FromStr for Platform {
    type Err = ProvisioningError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((os, arch)) = s.split_once('/') else {
            return Err(ProvisioningError::InvalidInput(
                format!("platform {s} is not of the form os/arch").into(),
            ));
        };
        let os = match os {
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            "macos" => Os::MacOs,
            _ => {
                return Err(ProvisioningError::InvalidInput(
                    format!("unknown operating system {os}").into(),
                ))
            }
        };
        let arch = match arch {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            _ => {
                return Err(ProvisioningError::InvalidInput(
                    format!("unknown architecture {arch}").into(),
                ))
            }
        };
        Ok(Platform { os, arch })
    }
}

/// Reachable coordinates of one device.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Host {
    /// Unique identity of the device within a pool.
    pub device_id: FastStr,
    pub host_name: FastStr,
    pub port: u16,
    pub platform: Platform,
    /// Optional jump host, in `user@host:port` form.
    pub proxy_jump: Option<FastStr>,
}

impl Host {
    pub fn new(
        device_id: impl Into<FastStr>,
        host_name: impl Into<FastStr>,
        port: u16,
        platform: Platform,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            host_name: host_name.into(),
            port,
            platform,
            proxy_jump: None,
        }
    }

    pub fn with_proxy_jump(mut self, proxy_jump: impl Into<FastStr>) -> Self {
        self.proxy_jump = Some(proxy_jump.into());
        self
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}, {})",
            self.device_id, self.host_name, self.port, self.platform
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_platform_round_trip() {
        for tag in ["linux/x86_64", "linux/aarch64", "windows/x86_64", "macos/aarch64"] {
            let platform: Platform = tag.parse().unwrap();
            assert_eq!(platform.to_string(), tag);
        }
    }

    #[test]
    fn test_platform_aliases() {
        assert_eq!(
            "linux/amd64".parse::<Platform>().unwrap(),
            Platform::new(Os::Linux, Arch::X86_64)
        );
        assert_eq!(
            "linux/arm64".parse::<Platform>().unwrap(),
            Platform::new(Os::Linux, Arch::Aarch64)
        );
    }

    #[test]
    fn test_platform_rejects_garbage() {
        assert!("linux".parse::<Platform>().is_err());
        assert!("solaris/x86_64".parse::<Platform>().is_err());
        assert!("linux/mips".parse::<Platform>().is_err());
    }
}
