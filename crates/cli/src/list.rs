use bridge::DeviceBridge;
use devices::{Capability, Device, DeviceRegistry, Protocol};
use eyre::WrapErr;
use serde::Serialize;

use crate::environment::Environment;

#[derive(Debug, Serialize)]
struct DeviceRow {
    #[serde(flatten)]
    device: Device,
    selected: bool,
    protocol: Protocol,
    sdk_tool_path: Option<String>,
}

fn rows(registry: &DeviceRegistry) -> Vec<DeviceRow> {
    let selected = registry.selected_device().map(|d| d.serial);
    registry
        .list_devices()
        .into_iter()
        .map(|device| {
            let secure = registry.capability_for(&device.serial, Capability::SecureProtocol.key());
            DeviceRow {
                selected: selected.as_deref() == Some(device.serial.as_str()),
                protocol: Protocol::from_capability(secure.as_deref()),
                sdk_tool_path: registry
                    .capability_for(&device.serial, Capability::SdkToolPath.key()),
                device,
            }
        })
        .collect()
}

pub async fn run(env: &Environment, json: bool) -> eyre::Result<()> {
    if !env.bridge.is_available() {
        eyre::bail!(
            "sdb executable {} not found; set bridge.path or launch.sdk_root in the config",
            env.bridge.program().display()
        );
    }
    env.refresh(None).await?;
    let rows = rows(&env.registry);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&rows).context("serializing devices")?
        );
        return Ok(());
    }

    if rows.is_empty() {
        println!("no devices attached");
        return Ok(());
    }
    for row in rows {
        let marker = if row.selected { "*" } else { " " };
        let arch = row
            .device
            .arch
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{marker} {:<24} {:<10} {:<8} {:<8} {}",
            row.device.serial,
            format!("{:?}", row.device.status).to_lowercase(),
            arch,
            format!("{:?}", row.protocol).to_lowercase(),
            row.device.name
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use bridge::Capabilities;
    use devices::DeviceStatus;

    use super::*;

    fn device(serial: &str) -> Device {
        Device {
            serial: serial.to_string(),
            name: "m-0212-1".to_string(),
            status: DeviceStatus::Online,
            arch: None,
        }
    }

    #[test]
    fn rows_carry_selection_and_protocol() {
        let registry = DeviceRegistry::new();
        registry.update(vec![device("emulator-26101"), device("RF8M21")]);
        let mut capabilities = Capabilities::new();
        capabilities.insert("secure_protocol".to_string(), "enabled".to_string());
        capabilities.insert("cpu_arch".to_string(), "armv7".to_string());
        registry.set_capabilities("RF8M21", capabilities);

        let rows = rows(&registry);
        assert_eq!(rows.len(), 2);
        assert!(rows[0].selected);
        assert_eq!(rows[0].protocol, Protocol::Plain);
        assert!(!rows[1].selected);
        assert_eq!(rows[1].protocol, Protocol::Secured);

        let json = serde_json::to_value(&rows[1]).unwrap();
        assert_eq!(json["serial"], "RF8M21");
        assert_eq!(json["protocol"], "secured");
        assert_eq!(json["arch"], "armv7");
    }
}
