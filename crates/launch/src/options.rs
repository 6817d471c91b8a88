//! Construction of device-side launch commands and debug engine options.
//!
//! Everything here is a pure function of its inputs so the two protocol
//! variants can be compared directly.

use std::{
    fmt, io,
    path::{Path, PathBuf},
    str::FromStr,
};

use devices::{CpuArch, Protocol};

/// Install root of user applications on the device
pub const APP_INSTALL_ROOT: &str = "/home/owner/apps_rw";

/// Tool directory used when the device does not report `sdk_toolpath`
pub const DEFAULT_SDK_TOOL_PATH: &str = "/home/owner/share/tmp/sdk_tools";

/// Host application that renders watch faces and widgets
pub const WIDGET_VIEWER_APP_ID: &str = "org.tizen.widget_viewer_sdk";

/// Port the on-device lldb-server listens on
pub const LLDB_SERVER_PORT: u16 = 1234;

/// Launch option telling the runtime to load IL assemblies instead of native images
pub const NI_DISABLE_OPTION: &str = "__DLP_DISABLE_NI__";

const ENGINE_OPTIONS_NAMESPACE: &str = "http://schemas.microsoft.com/vstudio/MDDDebuggerOptions/2014";

/// Application type from the package manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppType {
    Ui,
    Service,
    Watch,
    Widget,
    Ime,
}

impl AppType {
    /// Watch faces and widgets cannot be launched directly
    pub fn needs_widget_viewer(self) -> bool {
        matches!(self, AppType::Watch | AppType::Widget)
    }

    pub fn manifest_name(self) -> &'static str {
        match self {
            AppType::Ui => "ui-application",
            AppType::Service => "service-application",
            AppType::Watch => "watch-application",
            AppType::Widget => "widget-application",
            AppType::Ime => "ime-application",
        }
    }
}

impl FromStr for AppType {
    type Err = eyre::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ui-application" | "ui" => Ok(AppType::Ui),
            "service-application" | "service" => Ok(AppType::Service),
            "watch-application" | "watch" => Ok(AppType::Watch),
            "widget-application" | "widget" => Ok(AppType::Widget),
            "ime-application" | "ime" => Ok(AppType::Ime),
            other => Err(eyre::eyre!("invalid application type {other}")),
        }
    }
}

impl fmt::Display for AppType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.manifest_name())
    }
}

/// Managed-debugging parameters appended to a debug launch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedDebug {
    /// Assemblies the runtime should emit debug info for (`CORECLR_GDBJIT`)
    pub dlls: Vec<String>,
    pub disable_native_images: bool,
}

/// The application id actually launched and the arguments leading the user's own
fn launch_target(app_type: AppType, app_id: &str) -> (String, Vec<String>) {
    if app_type.needs_widget_viewer() {
        (
            WIDGET_VIEWER_APP_ID.to_string(),
            vec!["widget_id".to_string(), app_id.to_string()],
        )
    } else {
        (app_id.to_string(), Vec::new())
    }
}

/// Build the device-side command that starts the application.
///
/// `debug` is `None` for a plain run.
pub fn build_launch_command(
    protocol: Protocol,
    app_type: AppType,
    app_id: &str,
    extra_args: &[String],
    debug: Option<&ManagedDebug>,
) -> String {
    let (target, leading) = launch_target(app_type, app_id);
    let mut parts: Vec<String> = Vec::new();

    match protocol {
        Protocol::Plain => {
            parts.push("launch_app".to_string());
            parts.push(target);
            parts.extend(leading);
            parts.extend(extra_args.iter().cloned());
            if let Some(debug) = debug {
                parts.extend(debug_launchpad_args(debug));
            }
        }
        Protocol::Secured => {
            parts.push("0".to_string());
            parts.push(if debug.is_some() { "vs_debug" } else { "execute" }.to_string());
            parts.push(target);
            parts.extend(leading);
            parts.extend(extra_args.iter().cloned());
            if let Some(debug) = debug {
                parts.push(debug.dlls.join(","));
                if debug.disable_native_images {
                    parts.push(NI_DISABLE_OPTION.to_string());
                }
            }
        }
    }

    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Launchpad arguments that start the app under lldb-server (plain protocol)
fn debug_launchpad_args(debug: &ManagedDebug) -> Vec<String> {
    let mut args = vec![
        "__AUL_SDK__".to_string(),
        "LLDB-SERVER".to_string(),
        "__DLP_DEBUG_ARG__".to_string(),
        format!("g,--platform=host,*:{LLDB_SERVER_PORT},--"),
        "CORECLR_GDBJIT".to_string(),
        debug.dlls.join(","),
    ];
    if debug.disable_native_images {
        args.push(NI_DISABLE_OPTION.to_string());
    }
    args
}

/// Bridge arguments (after `-s <serial>`) of the debugger-engine pipe
pub fn pipe_command(protocol: Protocol, tool_path: &str) -> Vec<String> {
    match protocol {
        Protocol::Plain => vec![
            "shell".to_string(),
            "sh".to_string(),
            "-c".to_string(),
            format!("'{}/lldb/bin/lldb-mi'", tool_path.trim_end_matches('/')),
        ],
        Protocol::Secured => vec![
            "shell".to_string(),
            "0".to_string(),
            "vs_lldblaunch".to_string(),
        ],
    }
}

/// Full pipe argument string as handed to the debug engine
pub fn build_pipe_arguments(protocol: Protocol, serial: &str, tool_path: &str) -> String {
    let mut args = vec!["-s".to_string(), serial.to_string()];
    args.extend(pipe_command(protocol, tool_path));
    args.join(" ")
}

/// Inputs of the `PipeLaunchOptions` document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    pub pipe_path: PathBuf,
    pub pipe_arguments: String,
    pub pipe_cwd: PathBuf,
    pub exe_path: String,
    pub target_architecture: CpuArch,
    pub working_directory: String,
    pub additional_so_lib_search_path: PathBuf,
}

/// Render the options document the MI debug engine parses
pub fn engine_options_xml(options: &EngineOptions) -> String {
    format!(
        r#"<PipeLaunchOptions xmlns="{ns}" PipePath="{pipe_path}" PipeArguments="{pipe_arguments}" PipeCwd="{pipe_cwd}" ExePath="{exe_path}" MIMode="lldb" TargetArchitecture="{arch}" WorkingDirectory="{working_directory}" AdditionalSOLibSearchPath="{so_lib}" />"#,
        ns = ENGINE_OPTIONS_NAMESPACE,
        pipe_path = escape_attr(&options.pipe_path.display().to_string()),
        pipe_arguments = escape_attr(&options.pipe_arguments),
        pipe_cwd = escape_attr(&options.pipe_cwd.display().to_string()),
        exe_path = escape_attr(&options.exe_path),
        arch = options.target_architecture.mi_name(),
        working_directory = escape_attr(&options.working_directory),
        so_lib = escape_attr(&options.additional_so_lib_search_path.display().to_string()),
    )
}

fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Managed assemblies in `output_dir` that ship a `.pdb`, excluding native images.
///
/// The result is sorted so the generated command is stable.
pub fn gdbjit_dll_list(output_dir: &Path) -> io::Result<Vec<String>> {
    let mut dlls = Vec::new();
    for entry in std::fs::read_dir(output_dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if !lower.ends_with(".dll") || lower.ends_with(".ni.dll") {
            continue;
        }
        if path.with_extension("pdb").is_file() {
            dlls.push(name.to_string());
        }
    }
    dlls.sort();
    Ok(dlls)
}

/// Device path of the application's installation directory
pub fn app_install_dir(package_id: &str) -> String {
    format!("{APP_INSTALL_ROOT}/{package_id}")
}

/// Immutable description of one launch request
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub app_id: String,
    pub app_type: AppType,
    pub package_path: PathBuf,
    pub protocol: Protocol,
    /// Device-side command that starts the application
    pub shell_command: String,
    /// Bridge arguments (after `-s <serial>`) of the debugger pipe
    pub pipe_command: Vec<String>,
    /// `-s <serial> ...` as the debug engine sees it
    pub pipe_arguments: String,
    /// `PipeLaunchOptions` XML
    pub engine_options: String,
    pub debug: bool,
}

/// What [`LaunchOptions::new`] is computed from
#[derive(Debug, Clone)]
pub struct LaunchParameters<'a> {
    pub protocol: Protocol,
    pub serial: &'a str,
    pub app_id: &'a str,
    pub app_type: AppType,
    pub package_id: &'a str,
    pub package_path: &'a Path,
    pub exe_name: &'a str,
    pub extra_args: &'a [String],
    /// `None` for a plain run
    pub debug: Option<ManagedDebug>,
    pub bridge_program: &'a Path,
    pub tool_path: &'a str,
    pub arch: CpuArch,
    pub output_dir: &'a Path,
}

impl LaunchOptions {
    pub fn new(params: &LaunchParameters<'_>) -> Self {
        let shell_command = build_launch_command(
            params.protocol,
            params.app_type,
            params.app_id,
            params.extra_args,
            params.debug.as_ref(),
        );
        let pipe_arguments = build_pipe_arguments(params.protocol, params.serial, params.tool_path);
        let install_dir = app_install_dir(params.package_id);
        let engine_options = engine_options_xml(&EngineOptions {
            pipe_path: params.bridge_program.to_path_buf(),
            pipe_arguments: pipe_arguments.clone(),
            pipe_cwd: params
                .bridge_program
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            exe_path: format!("{install_dir}/bin/{}", params.exe_name),
            target_architecture: params.arch,
            working_directory: install_dir,
            additional_so_lib_search_path: params.output_dir.to_path_buf(),
        });

        Self {
            app_id: params.app_id.to_string(),
            app_type: params.app_type,
            package_path: params.package_path.to_path_buf(),
            protocol: params.protocol,
            shell_command,
            pipe_command: pipe_command(params.protocol, params.tool_path),
            pipe_arguments,
            engine_options,
            debug: params.debug.is_some(),
        }
    }

    /// Bridge arguments that issue [`LaunchOptions::shell_command`]
    pub fn shell_args(&self) -> Vec<String> {
        match self.protocol {
            Protocol::Plain => bridge::shell_args(&self.shell_command),
            Protocol::Secured => bridge::raw_shell_args(&self.shell_command),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debug(dlls: &[&str]) -> ManagedDebug {
        ManagedDebug {
            dlls: dlls.iter().map(|d| d.to_string()).collect(),
            disable_native_images: true,
        }
    }

    #[test]
    fn plain_run_command() {
        let cmd = build_launch_command(
            Protocol::Plain,
            AppType::Ui,
            "org.example.app",
            &["--flag".to_string()],
            None,
        );
        assert_eq!(cmd, "launch_app org.example.app --flag");
    }

    #[test]
    fn secured_run_command() {
        let cmd = build_launch_command(
            Protocol::Secured,
            AppType::Service,
            "org.example.svc",
            &[],
            None,
        );
        assert_eq!(cmd, "0 execute org.example.svc");
    }

    #[test]
    fn widget_goes_through_viewer() {
        let cmd = build_launch_command(
            Protocol::Plain,
            AppType::Widget,
            "org.example.widget",
            &[],
            None,
        );
        assert_eq!(
            cmd,
            "launch_app org.tizen.widget_viewer_sdk widget_id org.example.widget"
        );

        let cmd = build_launch_command(
            Protocol::Secured,
            AppType::Watch,
            "org.example.watch",
            &[],
            Some(&debug(&["Watch.dll"])),
        );
        assert_eq!(
            cmd,
            "0 vs_debug org.tizen.widget_viewer_sdk widget_id org.example.watch Watch.dll __DLP_DISABLE_NI__"
        );
    }

    #[test]
    fn native_images_stay_enabled_when_requested() {
        let mut dbg = debug(&["App.dll"]);
        dbg.disable_native_images = false;
        let cmd = build_launch_command(
            Protocol::Secured,
            AppType::Ui,
            "org.example.app",
            &[],
            Some(&dbg),
        );
        assert_eq!(cmd, "0 vs_debug org.example.app App.dll");
    }

    #[test]
    fn pipe_arguments_per_protocol() {
        assert_eq!(
            build_pipe_arguments(
                Protocol::Plain,
                "emulator-26101",
                "/home/owner/share/tmp/sdk_tools/"
            ),
            "-s emulator-26101 shell sh -c '/home/owner/share/tmp/sdk_tools/lldb/bin/lldb-mi'"
        );
        assert_eq!(
            build_pipe_arguments(Protocol::Secured, "0000d85b", DEFAULT_SDK_TOOL_PATH),
            "-s 0000d85b shell 0 vs_lldblaunch"
        );
    }

    #[test]
    fn engine_options_document() {
        let xml = engine_options_xml(&EngineOptions {
            pipe_path: PathBuf::from("/opt/tizen/tools/sdb"),
            pipe_arguments: "-s emulator-26101 shell sh -c '/tools/lldb/bin/lldb-mi'".to_string(),
            pipe_cwd: PathBuf::from("/opt/tizen/tools"),
            exe_path: "/home/owner/apps_rw/org.example/bin/App.dll".to_string(),
            target_architecture: CpuArch::X86,
            working_directory: "/home/owner/apps_rw/org.example".to_string(),
            additional_so_lib_search_path: PathBuf::from("/src/app/bin/Debug"),
        });
        assert_eq!(
            xml,
            "<PipeLaunchOptions xmlns=\"http://schemas.microsoft.com/vstudio/MDDDebuggerOptions/2014\" \
             PipePath=\"/opt/tizen/tools/sdb\" \
             PipeArguments=\"-s emulator-26101 shell sh -c &apos;/tools/lldb/bin/lldb-mi&apos;\" \
             PipeCwd=\"/opt/tizen/tools\" \
             ExePath=\"/home/owner/apps_rw/org.example/bin/App.dll\" \
             MIMode=\"lldb\" TargetArchitecture=\"x86\" \
             WorkingDirectory=\"/home/owner/apps_rw/org.example\" \
             AdditionalSOLibSearchPath=\"/src/app/bin/Debug\" />"
        );
    }

    #[test]
    fn dll_list_requires_pdb_and_skips_native_images() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "App.dll",
            "App.pdb",
            "Lib.dll",
            "Lib.ni.dll",
            "Lib.ni.pdb",
            "Other.dll",
            "Other.pdb",
            "notes.txt",
        ] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let dlls = gdbjit_dll_list(dir.path()).unwrap();
        assert_eq!(dlls, vec!["App.dll", "Other.dll"]);
    }

    #[test]
    fn app_type_names() {
        assert_eq!("ui-application".parse::<AppType>().unwrap(), AppType::Ui);
        assert_eq!("watch-application".parse::<AppType>().unwrap(), AppType::Watch);
        assert!("daemon".parse::<AppType>().is_err());
        assert_eq!(AppType::Ime.to_string(), "ime-application");
    }
}
