use std::{sync::Arc, time::Duration};

use bridge::DeviceBridge;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::{Device, DeviceRegistry};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Background task that keeps a [`DeviceRegistry`] in sync with the bridge
pub struct DeviceMonitor {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl DeviceMonitor {
    pub fn spawn<B: DeviceBridge>(
        registry: Arc<DeviceRegistry>,
        bridge: Arc<B>,
        interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::debug!("device monitor cancelled");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = poll_once(&registry, bridge.as_ref()).await {
                            tracing::warn!(error = %e, "polling devices");
                        }
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Some(handle),
        }
    }

    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for DeviceMonitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Refresh the registry once.
///
/// Capabilities are fetched for every online device without a stored table,
/// so devices that come online later and failed queries are picked up on the
/// next poll.
pub async fn poll_once<B: DeviceBridge>(
    registry: &DeviceRegistry,
    bridge: &B,
) -> Result<(), bridge::BridgeError> {
    let entries = bridge.devices().await?;
    let devices: Vec<Device> = entries.iter().map(Device::from_entry).collect();
    registry.update(devices);

    let missing: Vec<String> = registry
        .list_devices()
        .into_iter()
        .filter(|d| d.is_online() && !registry.has_capabilities(&d.serial))
        .map(|d| d.serial)
        .collect();
    for serial in missing {
        match bridge.capabilities(&serial).await {
            Ok(capabilities) => registry.set_capabilities(&serial, capabilities),
            Err(e) => tracing::warn!(error = %e, %serial, "reading device capabilities"),
        }
    }
    Ok(())
}
