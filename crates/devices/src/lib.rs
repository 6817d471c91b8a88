//! Known devices, the selected debug target, and device capabilities
mod monitor;
mod registry;
mod types;

pub use monitor::{DEFAULT_POLL_INTERVAL, DeviceMonitor, poll_once};
pub use registry::DeviceRegistry;
pub use types::{Capability, CpuArch, Device, DeviceStatus, Protocol};
