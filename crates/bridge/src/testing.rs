//! In-memory bridge for tests.
//!
//! [`RecordingBridge`] records every invocation, answers commands from a
//! list of scripted responses and mirrors pushed files into a simulated
//! device filesystem so tests can assert on device-side state.

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::{
        Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::{
    BridgeError, Capabilities, CommandOutput, DeviceBridge, DeviceEntry, LineSink, StreamHandle,
    device_args, push_target,
};

/// A call made against the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    Devices,
    Capabilities { serial: String },
    Run { serial: String, args: Vec<String> },
    Push {
        serial: String,
        local: PathBuf,
        device_dir: String,
        /// (file name, contents) of everything pushed
        files: Vec<(String, Vec<u8>)>,
    },
    Stream { serial: String, args: Vec<String> },
}

impl Invocation {
    /// Arguments joined with spaces, for substring assertions
    pub fn command_line(&self) -> String {
        match self {
            Invocation::Devices => "devices".to_string(),
            Invocation::Capabilities { .. } => "capability".to_string(),
            Invocation::Run { args, .. } | Invocation::Stream { args, .. } => args.join(" "),
            Invocation::Push {
                local, device_dir, ..
            } => format!("push {} {}", local.display(), device_dir),
        }
    }
}

#[derive(Default)]
pub struct RecordingBridge {
    available: AtomicBool,
    devices: Mutex<Vec<DeviceEntry>>,
    capabilities: Mutex<HashMap<String, Capabilities>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
    invocations: Mutex<Vec<Invocation>>,
    device_files: Mutex<BTreeMap<String, BTreeMap<String, Vec<u8>>>>,
    stream_lines: Mutex<Vec<String>>,
    failing_pushes: AtomicUsize,
    failing_capabilities: AtomicUsize,
    push_delay: Mutex<Option<Duration>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Consume one scripted failure, if any are left
fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl RecordingBridge {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            ..Default::default()
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_devices(&self, devices: Vec<DeviceEntry>) {
        *lock(&self.devices) = devices;
    }

    /// Add a single online device
    pub fn with_device(self, serial: &str, name: &str) -> Self {
        lock(&self.devices).push(DeviceEntry {
            serial: serial.to_string(),
            state: "device".to_string(),
            name: name.to_string(),
        });
        self
    }

    pub fn set_capabilities(&self, serial: &str, capabilities: &[(&str, &str)]) {
        let capabilities = capabilities
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        lock(&self.capabilities).insert(serial.to_string(), capabilities);
    }

    /// Answer any command whose joined arguments contain `needle` with the given output.
    ///
    /// Rules are checked in insertion order; unmatched commands succeed with empty output.
    pub fn respond(&self, needle: &str, stdout: &str, exit_code: i32) {
        lock(&self.responses).push((
            needle.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(exit_code),
            },
        ));
    }

    /// Lines emitted by every streaming command before it waits for cancellation
    pub fn set_stream_lines(&self, lines: &[&str]) {
        *lock(&self.stream_lines) = lines.iter().map(|l| l.to_string()).collect();
    }

    /// Make the next `n` pushes fail
    pub fn fail_next_pushes(&self, n: usize) {
        self.failing_pushes.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` capability queries fail
    pub fn fail_next_capabilities(&self, n: usize) {
        self.failing_capabilities.store(n, Ordering::SeqCst);
    }

    pub fn set_push_delay(&self, delay: Option<Duration>) {
        *lock(&self.push_delay) = delay;
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        lock(&self.invocations).clone()
    }

    pub fn pushes(&self) -> Vec<Invocation> {
        self.invocations()
            .into_iter()
            .filter(|i| matches!(i, Invocation::Push { .. }))
            .collect()
    }

    /// Command lines of all `run` invocations
    pub fn run_commands(&self) -> Vec<String> {
        self.invocations()
            .into_iter()
            .filter(|i| matches!(i, Invocation::Run { .. }))
            .map(|i| i.command_line())
            .collect()
    }

    /// Files currently present in a simulated device directory
    pub fn device_files(&self, device_dir: &str) -> BTreeMap<String, Vec<u8>> {
        lock(&self.device_files)
            .get(&push_target(device_dir))
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, invocation: Invocation) {
        lock(&self.invocations).push(invocation);
    }

    fn scripted(&self, args: &[String]) -> CommandOutput {
        let joined = args.join(" ");
        lock(&self.responses)
            .iter()
            .find(|(needle, _)| joined.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            })
    }
}

/// Snapshot `local` as (file name, contents) pairs; directories are flattened one level
fn snapshot(local: &Path) -> std::io::Result<Vec<(String, Vec<u8>)>> {
    let mut files = Vec::new();
    if local.is_dir() {
        for entry in std::fs::read_dir(local)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push((
                    entry.file_name().to_string_lossy().into_owned(),
                    std::fs::read(entry.path())?,
                ));
            }
        }
    } else {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        files.push((name, std::fs::read(local)?));
    }
    files.sort();
    Ok(files)
}

impl DeviceBridge for RecordingBridge {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn program(&self) -> &Path {
        Path::new("/opt/tizen-studio/tools/sdb")
    }

    async fn devices(&self) -> Result<Vec<DeviceEntry>, BridgeError> {
        self.record(Invocation::Devices);
        Ok(lock(&self.devices).clone())
    }

    async fn capabilities(&self, serial: &str) -> Result<Capabilities, BridgeError> {
        device_args(serial, &[])?;
        self.record(Invocation::Capabilities {
            serial: serial.to_string(),
        });
        if take_failure(&self.failing_capabilities) {
            return Err(BridgeError::Failed {
                command: "capability".to_string(),
                code: Some(1),
                output: "error: closed".to_string(),
            });
        }
        Ok(lock(&self.capabilities)
            .get(serial)
            .cloned()
            .unwrap_or_default())
    }

    async fn run(&self, serial: &str, args: &[String]) -> Result<CommandOutput, BridgeError> {
        device_args(serial, args)?;
        self.record(Invocation::Run {
            serial: serial.to_string(),
            args: args.to_vec(),
        });
        Ok(self.scripted(args))
    }

    async fn push(&self, serial: &str, local: &Path, device_dir: &str) -> Result<(), BridgeError> {
        device_args(serial, &[])?;
        let delay = *lock(&self.push_delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let files = snapshot(local).map_err(|source| BridgeError::Spawn {
            program: PathBuf::from("sdb"),
            source,
        })?;
        self.record(Invocation::Push {
            serial: serial.to_string(),
            local: local.to_path_buf(),
            device_dir: device_dir.to_string(),
            files: files.clone(),
        });

        if take_failure(&self.failing_pushes) {
            return Err(BridgeError::Failed {
                command: format!("push {}", local.display()),
                code: Some(1),
                output: "error: device not found".to_string(),
            });
        }

        let mut device_files = lock(&self.device_files);
        let dir = device_files.entry(push_target(device_dir)).or_default();
        dir.extend(files);
        Ok(())
    }

    fn spawn_streaming(
        &self,
        serial: &str,
        args: &[String],
        sink: Option<LineSink>,
    ) -> Result<StreamHandle, BridgeError> {
        device_args(serial, args)?;
        self.record(Invocation::Stream {
            serial: serial.to_string(),
            args: args.to_vec(),
        });

        let lines = lock(&self.stream_lines).clone();
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            if let Some(sink) = sink {
                for line in lines {
                    let _ = sink.send(line);
                }
            }
            token.cancelled().await;
            None
        });
        Ok(StreamHandle::from_task(args.join(" "), cancel, task))
    }
}
