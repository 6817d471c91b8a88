//! Wrapper around the `sdb` debug bridge utility.
//!
//! Every interaction with a device (listing, capability queries, shell
//! commands, file pushes, long running output streams) goes through the
//! [`DeviceBridge`] trait. [`SdbBridge`] is the process-backed implementation;
//! the `testing` feature adds an in-memory recorder for downstream tests.

use std::{collections::BTreeMap, future::Future, path::Path};

mod error;
mod parse;
mod sdb;
mod stream;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::BridgeError;
pub use parse::{DeviceEntry, parse_capabilities, parse_devices};
pub use sdb::{DEFAULT_COMMAND_TIMEOUT, SdbBridge};
pub use stream::{LineSink, StreamHandle};

/// Key/value pairs reported by `sdb capability`
pub type Capabilities = BTreeMap<String, String>;

/// Result of a completed bridge invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Operations the launch and hot-reload pipeline needs from a debug bridge.
///
/// Device-addressed operations take the device serial explicitly; an empty
/// serial is rejected with [`BridgeError::MissingSerial`].
pub trait DeviceBridge: Send + Sync + 'static {
    /// Whether the bridge executable can be invoked at all
    fn is_available(&self) -> bool;

    /// Path of the bridge executable, as handed to external debug engines
    fn program(&self) -> &Path;

    /// List attached devices and emulators
    fn devices(&self) -> impl Future<Output = Result<Vec<DeviceEntry>, BridgeError>> + Send;

    /// Query the capability table of a device
    fn capabilities(
        &self,
        serial: &str,
    ) -> impl Future<Output = Result<Capabilities, BridgeError>> + Send;

    /// Run `sdb -s <serial> <args..>` to completion.
    ///
    /// A non-zero exit status is reported through [`CommandOutput::exit_code`],
    /// not as an error.
    fn run(
        &self,
        serial: &str,
        args: &[String],
    ) -> impl Future<Output = Result<CommandOutput, BridgeError>> + Send;

    /// Copy a local file or directory into `device_dir` on the device
    fn push(
        &self,
        serial: &str,
        local: &Path,
        device_dir: &str,
    ) -> impl Future<Output = Result<(), BridgeError>> + Send;

    /// Spawn `sdb -s <serial> <args..>` and stream its output lines
    fn spawn_streaming(
        &self,
        serial: &str,
        args: &[String],
        sink: Option<LineSink>,
    ) -> Result<StreamHandle, BridgeError>;

    /// Run `<cmd>` through the device shell as `shell sh -c "<cmd>"`
    fn shell(
        &self,
        serial: &str,
        command: &str,
    ) -> impl Future<Output = Result<CommandOutput, BridgeError>> + Send {
        let args = shell_args(command);
        async move { self.run(serial, &args).await }
    }

    /// Run `<cmd>` as the raw argument of `shell`, without the `sh -c` wrapper.
    ///
    /// Secured-protocol devices only accept their fixed command set
    /// (`0 vs_debug ...`, `0 kill ...`) this way.
    fn shell_raw(
        &self,
        serial: &str,
        command: &str,
    ) -> impl Future<Output = Result<CommandOutput, BridgeError>> + Send {
        let args = raw_shell_args(command);
        async move { self.run(serial, &args).await }
    }
}

/// Arguments for `shell sh -c "<cmd>"`
pub fn shell_args(command: &str) -> Vec<String> {
    vec![
        "shell".to_string(),
        "sh".to_string(),
        "-c".to_string(),
        format!("\"{command}\""),
    ]
}

/// Arguments for `shell <cmd>`, passed to the device unwrapped
pub fn raw_shell_args(command: &str) -> Vec<String> {
    vec!["shell".to_string(), command.to_string()]
}

/// Prefix `args` with the `-s <serial>` device selector
pub fn device_args(serial: &str, args: &[String]) -> Result<Vec<String>, BridgeError> {
    if serial.trim().is_empty() {
        return Err(BridgeError::MissingSerial);
    }
    let mut out = Vec::with_capacity(args.len() + 2);
    out.push("-s".to_string());
    out.push(serial.to_string());
    out.extend(args.iter().cloned());
    Ok(out)
}

/// Normalise a device directory to the `<dir>/` form the bridge expects for pushes
pub fn push_target(device_dir: &str) -> String {
    format!("{}/", device_dir.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_args_requires_serial() {
        let err = device_args("  ", &["devices".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::MissingSerial));
    }

    #[test]
    fn device_args_prefixes_selector() {
        let args = device_args("emulator-26101", &["install".to_string(), "a.tpk".to_string()])
            .unwrap();
        assert_eq!(args, vec!["-s", "emulator-26101", "install", "a.tpk"]);
    }

    #[test]
    fn shell_wraps_command_in_quotes() {
        assert_eq!(
            shell_args("app_launcher -t org.example.app"),
            vec!["shell", "sh", "-c", "\"app_launcher -t org.example.app\""]
        );
    }

    #[test]
    fn raw_shell_keeps_command_as_one_word() {
        assert_eq!(
            raw_shell_args("0 vs_debug org.example.app"),
            vec!["shell", "0 vs_debug org.example.app"]
        );
    }

    #[test]
    fn push_target_has_single_trailing_slash() {
        assert_eq!(
            push_target("/home/owner/share/tmp/sdk_tools/.hotreload"),
            "/home/owner/share/tmp/sdk_tools/.hotreload/"
        );
        assert_eq!(push_target("/opt/usr/"), "/opt/usr/");
    }
}
