//! Installing and launching applications on a device, with or without the debugger
mod emulator;
mod install;
mod options;
mod orchestrator;

pub use devices::Protocol;
pub use emulator::{CommandEmulator, EmulatorLauncher};
pub use install::{
    DebugServerStatus, DebugServerTarget, InstallResult, InstallTarget, NoProgress,
    PackageInstaller, PackageRef, PendingPackages, Progress, TracingProgress,
    classify_install_output,
};
pub use options::{
    APP_INSTALL_ROOT, AppType, DEFAULT_SDK_TOOL_PATH, EngineOptions, LLDB_SERVER_PORT,
    LaunchOptions, LaunchParameters, ManagedDebug, NI_DISABLE_OPTION, WIDGET_VIEWER_APP_ID,
    app_install_dir, build_launch_command, build_pipe_arguments, engine_options_xml,
    gdbjit_dll_list, pipe_command,
};
pub use orchestrator::{
    DebugSession, LaunchError, LaunchOutcome, LaunchRequest, LaunchSettings, LaunchState,
    Launcher,
};
