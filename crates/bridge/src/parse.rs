//! Parsers for the plain-text output of `sdb devices` and `sdb capability`.

use crate::Capabilities;

/// One row of `sdb devices`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub serial: String,
    /// Connection state as printed by the bridge (`device`, `offline`, ...)
    pub state: String,
    /// Model or emulator name
    pub name: String,
}

/// Parse the device table.
///
/// ```text
/// List of devices attached
/// emulator-26101          device          T-samsung-8.0-x86
/// 0000d85b00006200        offline         TM1
/// ```
pub fn parse_devices(output: &str) -> Vec<DeviceEntry> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| {
            !line.is_empty() && !line.starts_with("List of devices") && !line.starts_with('*')
        })
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let serial = fields.next()?;
            let state = fields.next()?;
            let name = fields.collect::<Vec<_>>().join(" ");
            Some(DeviceEntry {
                serial: serial.to_string(),
                state: state.to_string(),
                name,
            })
        })
        .collect()
}

/// Parse `key:value` capability lines; malformed lines are ignored
pub fn parse_capabilities(output: &str) -> Capabilities {
    output
        .lines()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devices_table() {
        let output = "List of devices attached \n\
                      emulator-26101          device          T-samsung-8.0-x86\n\
                      0000d85b00006200        offline         TM1\n\n";
        let devices = parse_devices(output);
        assert_eq!(
            devices,
            vec![
                DeviceEntry {
                    serial: "emulator-26101".to_string(),
                    state: "device".to_string(),
                    name: "T-samsung-8.0-x86".to_string(),
                },
                DeviceEntry {
                    serial: "0000d85b00006200".to_string(),
                    state: "offline".to_string(),
                    name: "TM1".to_string(),
                },
            ]
        );
    }

    #[test]
    fn devices_skips_daemon_banner() {
        let output = "* Server is not running. Start it now on port 26099 *\n\
                      * Server has started successfully *\n\
                      List of devices attached\n";
        assert!(parse_devices(output).is_empty());
    }

    #[test]
    fn devices_name_with_spaces() {
        let devices = parse_devices("192.168.0.4:26101  device  Smart TV 2024\n");
        assert_eq!(devices[0].name, "Smart TV 2024");
    }

    #[test]
    fn capability_lines() {
        let output = "secure_protocol:enabled\n\
                      cpu_arch:armv7\n\
                      sdk_toolpath:/home/owner/share/tmp/sdk_tools\n\
                      garbage line\n\
                      :novalue\n";
        let caps = parse_capabilities(output);
        assert_eq!(caps.len(), 3);
        assert_eq!(caps["secure_protocol"], "enabled");
        assert_eq!(caps["cpu_arch"], "armv7");
        assert_eq!(caps["sdk_toolpath"], "/home/owner/share/tmp/sdk_tools");
    }
}
