use std::{
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use tokio::process::Command;

use crate::{
    BridgeError, Capabilities, CommandOutput, DeviceBridge, DeviceEntry, LineSink, StreamHandle,
    device_args, parse, push_target,
};

/// Default upper bound for a single non-streaming bridge invocation
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

#[cfg(windows)]
const SDB_BINARY: &str = "sdb.exe";
#[cfg(not(windows))]
const SDB_BINARY: &str = "sdb";

/// Process-backed [`DeviceBridge`] that shells out to the `sdb` executable
#[derive(Debug, Clone)]
pub struct SdbBridge {
    program: PathBuf,
    timeout: Option<Duration>,
}

impl SdbBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            timeout: Some(DEFAULT_COMMAND_TIMEOUT),
        }
    }

    /// Find the bridge executable.
    ///
    /// Candidates, in order: an explicitly configured path, `<sdk_root>/tools/sdb`, and
    /// the first `sdb` on `PATH`.
    pub fn locate(explicit: Option<&Path>, sdk_root: Option<&Path>) -> Result<Self, BridgeError> {
        let mut searched = Vec::new();

        if let Some(path) = explicit {
            if path.is_file() {
                return Ok(Self::new(path));
            }
            searched.push(path.display().to_string());
        }

        if let Some(root) = sdk_root {
            let candidate = root.join("tools").join(SDB_BINARY);
            if candidate.is_file() {
                return Ok(Self::new(candidate));
            }
            searched.push(candidate.display().to_string());
        }

        match which::which(SDB_BINARY) {
            Ok(path) => Ok(Self::new(path)),
            Err(_) => {
                searched.push("PATH".to_string());
                Err(BridgeError::NotFound {
                    searched: searched.join(", "),
                })
            }
        }
    }

    /// Override the per-command timeout; `None` waits indefinitely
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn command(&self, args: &[String]) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    #[tracing::instrument(skip(self), fields(program = %self.program.display()))]
    async fn output(&self, args: &[String]) -> Result<CommandOutput, BridgeError> {
        let rendered = args.join(" ");
        let spawned = self.command(args).output();

        let output = match self.timeout {
            Some(timeout) => tokio::time::timeout(timeout, spawned)
                .await
                .map_err(|_| BridgeError::Timeout {
                    command: rendered.clone(),
                    timeout,
                })?,
            None => spawned.await,
        }
        .map_err(|source| BridgeError::Spawn {
            program: self.program.clone(),
            source,
        })?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        tracing::debug!(exit_code = ?output.exit_code, "bridge command finished");
        if !output.stderr.trim().is_empty() {
            tracing::debug!(stderr = %output.stderr.trim(), "bridge command stderr");
        }
        Ok(output)
    }
}

impl DeviceBridge for SdbBridge {
    fn is_available(&self) -> bool {
        self.program.is_file()
    }

    fn program(&self) -> &Path {
        &self.program
    }

    async fn devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        let output = self.output(&["devices".to_string()]).await?;
        if !output.success() {
            return Err(BridgeError::Failed {
                command: "devices".to_string(),
                code: output.exit_code,
                output: output.stdout,
            });
        }
        Ok(parse::parse_devices(&output.stdout))
    }

    async fn capabilities(&self, serial: &str) -> Result<Capabilities, BridgeError> {
        let args = device_args(serial, &["capability".to_string()])?;
        let output = self.output(&args).await?;
        if !output.success() {
            return Err(BridgeError::Failed {
                command: args.join(" "),
                code: output.exit_code,
                output: output.stdout,
            });
        }
        Ok(parse::parse_capabilities(&output.stdout))
    }

    async fn run(&self, serial: &str, args: &[String]) -> Result<CommandOutput, BridgeError> {
        let args = device_args(serial, args)?;
        self.output(&args).await
    }

    async fn push(&self, serial: &str, local: &Path, device_dir: &str) -> Result<(), BridgeError> {
        let args = device_args(
            serial,
            &[
                "push".to_string(),
                local.display().to_string(),
                push_target(device_dir),
            ],
        )?;
        let output = self.output(&args).await?;
        if !output.success() {
            return Err(BridgeError::Failed {
                command: args.join(" "),
                code: output.exit_code,
                output: format!("{}{}", output.stdout, output.stderr),
            });
        }
        tracing::debug!(local = %local.display(), device_dir, "pushed");
        Ok(())
    }

    fn spawn_streaming(
        &self,
        serial: &str,
        args: &[String],
        sink: Option<LineSink>,
    ) -> Result<StreamHandle, BridgeError> {
        let args = device_args(serial, args)?;
        let label = args.get(2..).map(|rest| rest.join(" ")).unwrap_or_default();
        tracing::debug!(command = %label, "spawning streaming bridge command");
        let child = self.command(&args).spawn().map_err(|source| BridgeError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        Ok(StreamHandle::from_child(label, child, sink))
    }
}
