use std::{fmt, str::FromStr};

use serde::Serialize;

/// Connection state of a device as reported by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Unauthorized,
}

impl DeviceStatus {
    pub fn from_bridge_state(state: &str) -> Self {
        match state {
            "device" | "online" => DeviceStatus::Online,
            "unauthorized" => DeviceStatus::Unauthorized,
            _ => DeviceStatus::Offline,
        }
    }
}

/// CPU architecture of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuArch {
    Armv7,
    Aarch64,
    X86,
    X86_64,
}

impl CpuArch {
    /// Architecture name understood by the MI debug engine
    pub fn mi_name(self) -> &'static str {
        match self {
            CpuArch::Armv7 => "arm",
            CpuArch::Aarch64 => "arm64",
            CpuArch::X86 => "x86",
            CpuArch::X86_64 => "x64",
        }
    }

    /// Directory name used by SDK tool packages
    pub fn package_name(self) -> &'static str {
        match self {
            CpuArch::Armv7 => "armel",
            CpuArch::Aarch64 => "aarch64",
            CpuArch::X86 => "i586",
            CpuArch::X86_64 => "x86_64",
        }
    }
}

impl FromStr for CpuArch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "armv7" | "armv7l" | "arm" | "armel" => Ok(CpuArch::Armv7),
            "aarch64" | "arm64" => Ok(CpuArch::Aarch64),
            "x86" | "i586" | "i686" => Ok(CpuArch::X86),
            "x86_64" | "x64" => Ok(CpuArch::X86_64),
            other => Err(format!("unknown cpu architecture {other}")),
        }
    }
}

impl fmt::Display for CpuArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.package_name())
    }
}

/// Capability keys consumed from the device capability table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SecureProtocol,
    CpuArch,
    SdkToolPath,
}

impl Capability {
    pub fn key(self) -> &'static str {
        match self {
            Capability::SecureProtocol => "secure_protocol",
            Capability::CpuArch => "cpu_arch",
            Capability::SdkToolPath => "sdk_toolpath",
        }
    }
}

/// Command protocol spoken by the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Arbitrary shell commands through `sh -c`
    Plain,
    /// Only the fixed `0 <command>` set is accepted
    Secured,
}

impl Protocol {
    /// Interpret a `secure_protocol` capability value
    pub fn from_capability(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("enabled") | Some("yes") | Some("true") => Protocol::Secured,
            _ => Protocol::Plain,
        }
    }
}

/// An attached device or emulator
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Device {
    pub serial: String,
    pub name: String,
    pub status: DeviceStatus,
    pub arch: Option<CpuArch>,
}

impl Device {
    pub fn from_entry(entry: &bridge::DeviceEntry) -> Self {
        Self {
            serial: entry.serial.clone(),
            name: entry.name.clone(),
            status: DeviceStatus::from_bridge_state(&entry.state),
            arch: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arch_names() {
        assert_eq!("armv7l".parse::<CpuArch>().unwrap().mi_name(), "arm");
        assert_eq!("i686".parse::<CpuArch>().unwrap(), CpuArch::X86);
        assert_eq!("x86_64".parse::<CpuArch>().unwrap().mi_name(), "x64");
        assert!("mips".parse::<CpuArch>().is_err());
    }

    #[test]
    fn protocol_from_capability() {
        assert_eq!(Protocol::from_capability(Some("enabled")), Protocol::Secured);
        assert_eq!(Protocol::from_capability(Some("disabled")), Protocol::Plain);
        assert_eq!(Protocol::from_capability(None), Protocol::Plain);
    }

    #[test]
    fn status_from_bridge() {
        assert_eq!(DeviceStatus::from_bridge_state("device"), DeviceStatus::Online);
        assert_eq!(DeviceStatus::from_bridge_state("offline"), DeviceStatus::Offline);
        assert_eq!(
            DeviceStatus::from_bridge_state("unauthorized"),
            DeviceStatus::Unauthorized
        );
    }
}
