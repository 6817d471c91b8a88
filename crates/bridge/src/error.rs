//! Error types for the bridge transport.

use std::{io, path::PathBuf, time::Duration};

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The bridge executable could not be located.
    #[error("sdb executable not found (searched: {searched})")]
    NotFound { searched: String },

    /// A device-addressed command was issued without a serial.
    #[error("no device serial given for bridge command")]
    MissingSerial,

    /// Spawning or talking to the bridge process failed.
    #[error("running {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The bridge process did not exit within the configured timeout.
    #[error("bridge command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    /// The bridge process exited with a non-zero status.
    #[error("bridge command `{command}` failed with exit code {code:?}: {output}")]
    Failed {
        command: String,
        code: Option<i32>,
        output: String,
    },
}

impl BridgeError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, BridgeError::Timeout { .. })
    }
}
