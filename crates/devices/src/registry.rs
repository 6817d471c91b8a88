use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use bridge::Capabilities;
use tokio::sync::watch;

use crate::{Capability, CpuArch, Device, Protocol};

#[derive(Default)]
struct Inner {
    devices: Vec<Device>,
    selected: Option<String>,
    capabilities: HashMap<String, Capabilities>,
}

impl Inner {
    fn selected_device(&self) -> Option<Device> {
        let serial = self.selected.as_ref()?;
        self.devices.iter().find(|d| &d.serial == serial).cloned()
    }
}

/// Registry of attached devices and the currently selected target.
///
/// Only the registry writes the selection. Readers get owned snapshots and
/// must tolerate the selection changing between two calls.
pub struct DeviceRegistry {
    inner: RwLock<Inner>,
    selection: watch::Sender<Option<Device>>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (selection, _) = watch::channel(None);
        Self {
            inner: RwLock::new(Inner::default()),
            selection,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Devices in the order the bridge reported them
    pub fn list_devices(&self) -> Vec<Device> {
        self.read().devices.clone()
    }

    pub fn is_empty(&self) -> bool {
        self.read().devices.is_empty()
    }

    pub fn selected_device(&self) -> Option<Device> {
        self.read().selected_device()
    }

    /// Subscribe to changes of the selected device
    pub fn subscribe(&self) -> watch::Receiver<Option<Device>> {
        self.selection.subscribe()
    }

    /// Select a known device; returns `false` if the serial is unknown
    pub fn select(&self, serial: &str) -> bool {
        let selected = {
            let mut inner = self.write();
            if !inner.devices.iter().any(|d| d.serial == serial) {
                tracing::warn!(serial, "cannot select unknown device");
                return false;
            }
            inner.selected = Some(serial.to_string());
            inner.selected_device()
        };
        tracing::info!(serial, "selected device");
        self.broadcast(selected);
        true
    }

    /// Replace the device list with a fresh poll result.
    ///
    /// Returns the serials that were not known before. The selection survives
    /// if its device is still attached; otherwise it is cleared, and when nothing is
    /// selected the first online device is picked.
    pub fn update(&self, devices: Vec<Device>) -> Vec<String> {
        let (added, selected) = {
            let mut inner = self.write();

            let added: Vec<String> = devices
                .iter()
                .filter(|d| !inner.devices.iter().any(|known| known.serial == d.serial))
                .map(|d| d.serial.clone())
                .collect();

            let previous = std::mem::take(&mut inner.devices);
            inner.devices = devices
                .into_iter()
                .map(|mut device| {
                    if let Some(known) = previous.iter().find(|p| p.serial == device.serial) {
                        device.arch = device.arch.or(known.arch);
                    }
                    device
                })
                .collect();

            let Inner {
                devices,
                capabilities,
                ..
            } = &mut *inner;
            capabilities.retain(|serial, _| devices.iter().any(|d| &d.serial == serial));

            let still_present = inner
                .selected
                .as_ref()
                .is_some_and(|serial| inner.devices.iter().any(|d| &d.serial == serial));
            if !still_present {
                if let Some(serial) = inner.selected.take() {
                    tracing::info!(%serial, "selected device disconnected");
                }
                inner.selected = inner
                    .devices
                    .iter()
                    .find(|d| d.is_online())
                    .map(|d| d.serial.clone());
            }

            (added, inner.selected_device())
        };

        for serial in &added {
            tracing::debug!(%serial, "device attached");
        }
        self.broadcast(selected);
        added
    }

    /// Store the capability table of a device
    pub fn set_capabilities(&self, serial: &str, capabilities: Capabilities) {
        let selected = {
            let mut inner = self.write();
            let arch = capabilities
                .get(Capability::CpuArch.key())
                .and_then(|value| value.parse::<CpuArch>().ok());
            if let Some(device) = inner.devices.iter_mut().find(|d| d.serial == serial) {
                device.arch = arch;
            }
            inner.capabilities.insert(serial.to_string(), capabilities);
            inner.selected_device()
        };
        self.broadcast(selected);
    }

    /// Capability value of the selected device
    pub fn capability(&self, key: &str) -> Option<String> {
        let inner = self.read();
        let serial = inner.selected.as_ref()?;
        inner.capabilities.get(serial)?.get(key).cloned()
    }

    /// Whether a capability table has been stored for `serial`
    pub fn has_capabilities(&self, serial: &str) -> bool {
        self.read().capabilities.contains_key(serial)
    }

    pub fn capability_for(&self, serial: &str, key: &str) -> Option<String> {
        self.read().capabilities.get(serial)?.get(key).cloned()
    }

    /// Protocol spoken by the selected device
    pub fn protocol(&self) -> Protocol {
        Protocol::from_capability(self.capability(Capability::SecureProtocol.key()).as_deref())
    }

    fn broadcast(&self, selected: Option<Device>) {
        self.selection.send_if_modified(|current| {
            if *current != selected {
                *current = selected;
                true
            } else {
                false
            }
        });
    }
}
