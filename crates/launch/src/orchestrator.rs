//! The launch state machine: install, optionally set up the debug server,
//! then start the application with or without the debugger pipe.

use std::{path::PathBuf, sync::Arc};

use bridge::{BridgeError, DeviceBridge, LineSink, StreamHandle};
use devices::{Capability, CpuArch, Device, DeviceRegistry, Protocol};
use tokio::sync::watch;

use crate::{
    emulator::EmulatorLauncher,
    install::{
        DebugServerTarget, InstallResult, InstallTarget, PackageInstaller, PackageRef,
        PendingPackages, Progress,
    },
    options::{
        AppType, DEFAULT_SDK_TOOL_PATH, LaunchOptions, LaunchParameters, ManagedDebug,
        gdbjit_dll_list,
    },
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchState {
    Idle,
    Installing,
    ServerInstalling,
    Launching,
    Running,
    Failed(String),
    EmulatorRequested,
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("sdb executable not found; configure the bridge path")]
    BridgeUnavailable,

    #[error("no target device selected")]
    NoTarget,

    #[error("{}", .0.user_message())]
    Install(InstallResult),

    #[error("preparing debug server: {0}")]
    DebugServer(String),

    #[error("launching {app_id}: {message}")]
    Launch { app_id: String, message: String },

    #[error("starting emulator: {0}")]
    Emulator(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// A user request to run or debug an application
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub app_id: String,
    pub app_type: AppType,
    /// Package produced by the latest build
    pub package: PackageRef,
    /// Build output directory (assemblies, symbols)
    pub output_dir: PathBuf,
    /// Entry assembly or executable inside `<install dir>/bin`
    pub exe_name: String,
    pub extra_args: Vec<String>,
    pub debug: bool,
    pub force_reinstall: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LaunchSettings {
    pub sdk_root: Option<PathBuf>,
    pub disable_native_images: bool,
}

/// A running debug launch; dropping it stops both device streams
#[derive(Debug)]
pub struct DebugSession {
    pub serial: String,
    pub app_id: String,
    /// `PipeLaunchOptions` for the hosting debug engine
    pub engine_options: String,
    launch: StreamHandle,
    pipe: StreamHandle,
}

impl DebugSession {
    pub fn is_finished(&self) -> bool {
        self.launch.is_finished() && self.pipe.is_finished()
    }

    pub async fn stop(self) {
        self.pipe.cancel();
        self.launch.cancel();
        let _ = self.pipe.wait().await;
        let _ = self.launch.wait().await;
        tracing::debug!(app_id = %self.app_id, "debug session stopped");
    }
}

#[derive(Debug)]
pub enum LaunchOutcome {
    /// No device was attached, an emulator is booting instead
    EmulatorRequested,
    /// The app was started without a debugger
    Running,
    Debugging(DebugSession),
}

pub struct Launcher<B, E> {
    bridge: Arc<B>,
    registry: Arc<DeviceRegistry>,
    installer: PackageInstaller<B>,
    emulator: E,
    settings: LaunchSettings,
    progress: Arc<dyn Progress>,
    line_sink: Option<LineSink>,
    state: watch::Sender<LaunchState>,
}

/// A launcher output line reporting that the app did not start
fn is_launch_failure(line: &str) -> bool {
    let lower = line.trim().to_ascii_lowercase();
    lower.starts_with("error") || lower.contains("launch failed")
}

impl<B: DeviceBridge, E: EmulatorLauncher> Launcher<B, E> {
    pub fn new(
        bridge: Arc<B>,
        registry: Arc<DeviceRegistry>,
        pending: Arc<PendingPackages>,
        emulator: E,
        settings: LaunchSettings,
        progress: Arc<dyn Progress>,
    ) -> Self {
        let (state, _) = watch::channel(LaunchState::Idle);
        Self {
            installer: PackageInstaller::new(bridge.clone(), pending),
            bridge,
            registry,
            emulator,
            settings,
            progress,
            line_sink: None,
            state,
        }
    }

    /// Forward device output lines (launch diagnostics, debugger pipe) to `sink`
    pub fn with_line_sink(mut self, sink: LineSink) -> Self {
        self.line_sink = Some(sink);
        self
    }

    pub fn installer(&self) -> &PackageInstaller<B> {
        &self.installer
    }

    pub fn state(&self) -> LaunchState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<LaunchState> {
        self.state.subscribe()
    }

    /// A launch can proceed when sdb is usable, or when no device is attached
    /// (the launch then boots an emulator)
    pub fn can_launch(&self) -> bool {
        self.bridge.is_available() || self.registry.is_empty()
    }

    fn transition(&self, state: LaunchState) {
        tracing::debug!(?state, "launch state");
        self.state.send_replace(state);
    }

    fn fail(&self, error: LaunchError) -> LaunchError {
        let message = error.to_string();
        tracing::error!(%message, "launch failed");
        self.progress.report(&message);
        self.transition(LaunchState::Failed(message));
        error
    }

    #[tracing::instrument(
        skip(self, request),
        fields(app_id = %request.app_id, debug = request.debug)
    )]
    pub async fn launch(&self, request: &LaunchRequest) -> Result<LaunchOutcome, LaunchError> {
        if self.registry.is_empty() {
            tracing::info!("no device attached, requesting emulator");
            self.transition(LaunchState::EmulatorRequested);
            self.emulator
                .start()
                .await
                .map_err(|e| self.fail(LaunchError::Emulator(format!("{e:#}"))))?;
            return Ok(LaunchOutcome::EmulatorRequested);
        }

        if !self.bridge.is_available() {
            return Err(self.fail(LaunchError::BridgeUnavailable));
        }

        let device = self
            .registry
            .selected_device()
            .ok_or_else(|| self.fail(LaunchError::NoTarget))?;
        let target = self.resolve_target(&device);
        let package = self
            .installer
            .resolve_package(&device.serial, target.protocol, &request.app_id, &request.package)
            .await;

        let debug = request.debug.then(|| ManagedDebug {
            dlls: match gdbjit_dll_list(&request.output_dir) {
                Ok(dlls) => dlls,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        dir = %request.output_dir.display(),
                        "listing assemblies"
                    );
                    Vec::new()
                }
            },
            disable_native_images: self.settings.disable_native_images,
        });

        let options = LaunchOptions::new(&LaunchParameters {
            protocol: target.protocol,
            serial: &device.serial,
            app_id: &request.app_id,
            app_type: request.app_type,
            package_id: &package.package_id,
            package_path: &package.path,
            exe_name: &request.exe_name,
            extra_args: &request.extra_args,
            debug,
            bridge_program: &target.bridge_program,
            tool_path: &target.tool_path,
            arch: target.arch,
            output_dir: &request.output_dir,
        });
        tracing::debug!(command = %options.shell_command, "launch options built");

        self.transition(LaunchState::Installing);
        let result = self
            .installer
            .install(
                &InstallTarget {
                    serial: device.serial.clone(),
                    protocol: target.protocol,
                    app_id: request.app_id.clone(),
                    package,
                },
                self.progress.as_ref(),
                request.force_reinstall,
            )
            .await;
        if !result.is_success() {
            return Err(self.fail(LaunchError::Install(result)));
        }

        if options.debug {
            self.transition(LaunchState::ServerInstalling);
            let sdk_root = self.settings.sdk_root.clone().unwrap_or_default();
            self.installer
                .ensure_debug_server(&DebugServerTarget {
                    serial: &device.serial,
                    protocol: target.protocol,
                    arch: target.arch,
                    tool_path: &target.tool_path,
                    sdk_root: &sdk_root,
                })
                .await
                .map_err(|e| self.fail(LaunchError::DebugServer(format!("{e:#}"))))?;
        }

        self.transition(LaunchState::Launching);
        let outcome = if options.debug {
            let session = self
                .start_debugging(&device.serial, &options)
                .map_err(|e| self.fail(e))?;
            LaunchOutcome::Debugging(session)
        } else {
            self.start_running(&device.serial, &options)
                .await
                .map_err(|e| self.fail(e))?;
            LaunchOutcome::Running
        };

        self.progress.report(&format!("{} started", options.app_id));
        self.transition(LaunchState::Running);
        Ok(outcome)
    }

    fn resolve_target(&self, device: &Device) -> ResolvedTarget {
        let capability = |c: Capability| self.registry.capability_for(&device.serial, c.key());

        let protocol = Protocol::from_capability(capability(Capability::SecureProtocol).as_deref());
        let tool_path = capability(Capability::SdkToolPath)
            .unwrap_or_else(|| DEFAULT_SDK_TOOL_PATH.to_string());
        let arch = capability(Capability::CpuArch)
            .and_then(|value| value.parse::<CpuArch>().ok())
            .or(device.arch)
            .unwrap_or_else(|| {
                let fallback = if device.is_emulator() {
                    CpuArch::X86
                } else {
                    CpuArch::Armv7
                };
                tracing::warn!(
                    serial = %device.serial,
                    arch = %fallback,
                    "device architecture unknown, assuming default"
                );
                fallback
            });
        let bridge_program = self.bridge.program().to_path_buf();

        ResolvedTarget {
            protocol,
            tool_path,
            arch,
            bridge_program,
        }
    }

    async fn start_running(
        &self,
        serial: &str,
        options: &LaunchOptions,
    ) -> Result<(), LaunchError> {
        let output = self.bridge.run(serial, &options.shell_args()).await?;
        if !output.success() || output.stdout.lines().any(is_launch_failure) {
            return Err(LaunchError::Launch {
                app_id: options.app_id.clone(),
                message: output.stdout.trim().to_string(),
            });
        }
        for line in output.stdout.lines().filter(|l| !l.trim().is_empty()) {
            tracing::info!(target: "device_output", "{line}");
        }
        Ok(())
    }

    fn start_debugging(
        &self,
        serial: &str,
        options: &LaunchOptions,
    ) -> Result<DebugSession, LaunchError> {
        let launch = self
            .bridge
            .spawn_streaming(serial, &options.shell_args(), self.line_sink.clone())?;
        let pipe = self
            .bridge
            .spawn_streaming(serial, &options.pipe_command, self.line_sink.clone())?;
        tracing::info!(pipe = %options.pipe_arguments, "debugger pipe started");

        Ok(DebugSession {
            serial: serial.to_string(),
            app_id: options.app_id.clone(),
            engine_options: options.engine_options.clone(),
            launch,
            pipe,
        })
    }
}

struct ResolvedTarget {
    protocol: Protocol,
    tool_path: String,
    arch: CpuArch,
    bridge_program: PathBuf,
}
