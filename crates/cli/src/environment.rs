use std::sync::Arc;

use bridge::{DeviceBridge, SdbBridge};
use config::Config;
use devices::{DeviceMonitor, DeviceRegistry};
use eyre::WrapErr;

/// Objects shared by all commands for one invocation
pub struct Environment {
    pub config: Config,
    pub bridge: Arc<SdbBridge>,
    pub registry: Arc<DeviceRegistry>,
}

impl Environment {
    /// A missing `sdb` is not fatal here; commands decide how to handle it
    pub fn new(config: Config) -> Self {
        let bridge = match SdbBridge::locate(
            config.bridge.path.as_deref(),
            config.launch.sdk_root.as_deref(),
        ) {
            Ok(bridge) => bridge,
            Err(e) => {
                tracing::warn!(error = %e, "sdb not found");
                SdbBridge::new(config.bridge.path.clone().unwrap_or_else(|| "sdb".into()))
            }
        }
        .with_timeout(config.bridge.command_timeout());

        Self {
            config,
            bridge: Arc::new(bridge),
            registry: Arc::new(DeviceRegistry::new()),
        }
    }

    /// Keep the registry current while a long-running command works
    pub fn monitor(&self) -> DeviceMonitor {
        DeviceMonitor::spawn(
            self.registry.clone(),
            self.bridge.clone(),
            self.config.devices.poll_interval(),
        )
    }

    /// Whether `serial` has gone away or is no longer online
    pub fn is_detached(&self, serial: &str) -> bool {
        !self
            .registry
            .list_devices()
            .iter()
            .any(|d| d.serial == serial && d.is_online())
    }

    /// Refresh the device list once and select `serial` if given
    pub async fn refresh(&self, serial: Option<&str>) -> eyre::Result<()> {
        if self.bridge.is_available() {
            devices::poll_once(&self.registry, self.bridge.as_ref())
                .await
                .wrap_err("listing devices")?;
        }
        if let Some(serial) = serial {
            if !self.registry.select(serial) {
                eyre::bail!("device {serial} is not attached");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use devices::{Device, DeviceStatus};

    use super::*;

    fn device(serial: &str, status: DeviceStatus) -> Device {
        Device {
            serial: serial.to_string(),
            name: "TM1".to_string(),
            status,
            arch: None,
        }
    }

    #[test]
    fn target_detaches_when_removed_or_offline() {
        let env = Environment::new(Config::default());
        env.registry.update(vec![device("RF8M21", DeviceStatus::Online)]);
        assert!(!env.is_detached("RF8M21"));

        env.registry.update(vec![device("RF8M21", DeviceStatus::Offline)]);
        assert!(env.is_detached("RF8M21"));

        env.registry.update(vec![device("emulator-26101", DeviceStatus::Online)]);
        assert!(env.is_detached("RF8M21"));
    }

    #[tokio::test]
    async fn monitor_polls_at_configured_interval() {
        let mut config = Config::default();
        config.devices.poll_interval_ms = 250;
        assert_eq!(config.devices.poll_interval(), std::time::Duration::from_millis(250));

        let env = Environment::new(config);
        let monitor = env.monitor();
        monitor.stop().await;
    }
}
