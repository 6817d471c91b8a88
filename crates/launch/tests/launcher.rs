use std::{
    io::IsTerminal,
    path::Path,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use bridge::{DeviceEntry, testing::RecordingBridge};
use devices::{Device, DeviceRegistry, Protocol};
use launch::{
    AppType, EmulatorLauncher, InstallResult, LaunchError, LaunchOutcome, LaunchRequest,
    LaunchSettings, LaunchState, Launcher, ManagedDebug, PackageRef, PendingPackages, Progress,
    build_launch_command,
};
use tracing_subscriber::EnvFilter;

// test suite "constructor"
#[ctor::ctor]
fn init() {
    let in_ci = std::env::var("CI")
        .map(|val| val == "true")
        .unwrap_or(false);

    if std::io::stderr().is_terminal() || in_ci {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init();
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .json()
            .try_init();
    }

    let _ = color_eyre::install();
}

const SERIAL: &str = "emulator-26101";

#[derive(Default, Clone)]
struct CountingEmulator {
    starts: Arc<AtomicUsize>,
}

impl EmulatorLauncher for CountingEmulator {
    async fn start(&self) -> eyre::Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct CollectingProgress {
    messages: Mutex<Vec<String>>,
}

impl Progress for CollectingProgress {
    fn report(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    bridge: Arc<RecordingBridge>,
    registry: Arc<DeviceRegistry>,
    pending: Arc<PendingPackages>,
    emulator: CountingEmulator,
    progress: Arc<CollectingProgress>,
    request: LaunchRequest,
    sdk_root: std::path::PathBuf,
}

impl Fixture {
    fn new(secure: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("bin");
        std::fs::create_dir_all(&output_dir).unwrap();
        for name in ["App.dll", "App.pdb", "Lib.dll"] {
            std::fs::write(output_dir.join(name), b"").unwrap();
        }
        let package_path = dir.path().join("org.example.app-1.0.0.tpk");
        std::fs::write(&package_path, b"tpk").unwrap();

        let sdk_root = dir.path().join("sdk");
        std::fs::create_dir_all(sdk_root.join("tools/lldb/i586/bin")).unwrap();
        std::fs::write(sdk_root.join("tools/lldb/i586/bin/lldb-server"), b"elf").unwrap();
        std::fs::create_dir_all(sdk_root.join("on-demand")).unwrap();
        std::fs::write(sdk_root.join("on-demand/lldb-i586.tar.gz"), b"gz").unwrap();

        let bridge = Arc::new(RecordingBridge::new());
        bridge.set_devices(vec![DeviceEntry {
            serial: SERIAL.to_string(),
            state: "device".to_string(),
            name: "T-8.0-x86".to_string(),
        }]);
        let registry = Arc::new(DeviceRegistry::new());
        registry.update(vec![Device::from_entry(&DeviceEntry {
            serial: SERIAL.to_string(),
            state: "device".to_string(),
            name: "T-8.0-x86".to_string(),
        })]);
        registry.set_capabilities(
            SERIAL,
            [
                ("secure_protocol", if secure { "enabled" } else { "disabled" }),
                ("cpu_arch", "x86"),
                ("sdk_toolpath", "/home/owner/share/tmp/sdk_tools"),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        );

        let request = LaunchRequest {
            app_id: "org.example.app".to_string(),
            app_type: AppType::Ui,
            package: PackageRef {
                package_id: "org.example".to_string(),
                version: Some("1.0.0".to_string()),
                path: package_path,
            },
            output_dir,
            exe_name: "App.dll".to_string(),
            extra_args: vec!["--flag".to_string()],
            debug: true,
            force_reinstall: true,
        };

        Self {
            _dir: dir,
            bridge,
            registry,
            pending: Arc::new(PendingPackages::default()),
            emulator: CountingEmulator::default(),
            progress: Arc::new(CollectingProgress::default()),
            request,
            sdk_root,
        }
    }

    fn launcher(&self) -> Launcher<RecordingBridge, CountingEmulator> {
        Launcher::new(
            self.bridge.clone(),
            self.registry.clone(),
            self.pending.clone(),
            self.emulator.clone(),
            LaunchSettings {
                sdk_root: Some(self.sdk_root.clone()),
                disable_native_images: true,
            },
            self.progress.clone(),
        )
    }
}

#[test]
fn protocol_variants_differ_only_in_prefix_and_debug_block() {
    let debug = ManagedDebug {
        dlls: vec!["App.dll".to_string(), "Lib.dll".to_string()],
        disable_native_images: true,
    };
    let extra = vec!["--flag".to_string()];

    let plain = build_launch_command(
        Protocol::Plain,
        AppType::Ui,
        "org.example.app",
        &extra,
        Some(&debug),
    );
    let secured = build_launch_command(
        Protocol::Secured,
        AppType::Ui,
        "org.example.app",
        &extra,
        Some(&debug),
    );

    assert_eq!(
        plain,
        "launch_app org.example.app --flag __AUL_SDK__ LLDB-SERVER __DLP_DEBUG_ARG__ \
         g,--platform=host,*:1234,-- CORECLR_GDBJIT App.dll,Lib.dll __DLP_DISABLE_NI__"
    );
    assert_eq!(
        secured,
        "0 vs_debug org.example.app --flag App.dll,Lib.dll __DLP_DISABLE_NI__"
    );
}

#[tokio::test]
async fn no_device_requests_emulator_even_without_bridge() {
    let fixture = Fixture::new(false);
    fixture.registry.update(vec![]);
    fixture.bridge.set_available(false);

    let launcher = fixture.launcher();
    assert!(launcher.can_launch());

    let outcome = launcher.launch(&fixture.request).await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::EmulatorRequested));
    assert_eq!(launcher.state(), LaunchState::EmulatorRequested);
    assert_eq!(fixture.emulator.starts.load(Ordering::SeqCst), 1);
    assert!(fixture.bridge.invocations().is_empty());
}

#[tokio::test]
async fn missing_bridge_with_device_cannot_launch() {
    let fixture = Fixture::new(false);
    fixture.bridge.set_available(false);
    let launcher = fixture.launcher();
    assert!(!launcher.can_launch());

    let err = launcher.launch(&fixture.request).await.unwrap_err();
    assert!(matches!(err, LaunchError::BridgeUnavailable));
    assert!(matches!(launcher.state(), LaunchState::Failed(_)));
}

#[tokio::test]
async fn plain_debug_launch_sequence() {
    let fixture = Fixture::new(false);
    fixture.bridge.set_stream_lines(&["(lldb) process launched"]);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let launcher = fixture.launcher().with_line_sink(tx);

    let outcome = launcher.launch(&fixture.request).await.unwrap();
    let LaunchOutcome::Debugging(session) = outcome else {
        panic!("expected a debug session");
    };
    assert_eq!(launcher.state(), LaunchState::Running);
    assert!(session.engine_options.contains("MIMode=\"lldb\""));
    assert!(session.engine_options.contains("TargetArchitecture=\"x86\""));
    assert!(session.engine_options.contains("PipePath=\"/opt/tizen-studio/tools/sdb\""));

    let runs = fixture.bridge.run_commands();
    assert_eq!(runs[0], "shell sh -c \"app_launcher -t org.example.app\"");
    assert!(runs[1].starts_with("install "));
    assert!(runs[2].contains("ls /home/owner/share/tmp/sdk_tools/lldb/bin/lldb-server"));
    assert!(runs[3].contains("chmod +x /home/owner/share/tmp/sdk_tools/lldb/bin/*"));

    let streams: Vec<String> = fixture
        .bridge
        .invocations()
        .into_iter()
        .filter(|i| matches!(i, bridge::testing::Invocation::Stream { .. }))
        .map(|i| i.command_line())
        .collect();
    assert_eq!(streams.len(), 2);
    assert!(streams[0].contains("launch_app org.example.app --flag __AUL_SDK__"));
    assert!(streams[0].contains("CORECLR_GDBJIT App.dll"));
    assert_eq!(
        streams[1],
        "shell sh -c '/home/owner/share/tmp/sdk_tools/lldb/bin/lldb-mi'"
    );

    assert_eq!(rx.recv().await.as_deref(), Some("(lldb) process launched"));
    session.stop().await;
}

#[tokio::test]
async fn secured_debug_uses_archive_install_and_vs_commands() {
    let fixture = Fixture::new(true);
    let launcher = fixture.launcher();

    let outcome = launcher.launch(&fixture.request).await.unwrap();
    let LaunchOutcome::Debugging(session) = outcome else {
        panic!("expected a debug session");
    };

    let runs = fixture.bridge.run_commands();
    assert_eq!(runs[0], "shell 0 kill org.example.app");
    assert!(runs.iter().any(|r| r.contains(
        "0 ondemand_install /home/owner/share/tmp/sdk_tools/on-demand/lldb-i586.tar.gz"
    )));
    let pushes = fixture.bridge.pushes();
    assert_eq!(pushes.len(), 1);

    let streams: Vec<String> = fixture
        .bridge
        .invocations()
        .into_iter()
        .filter(|i| matches!(i, bridge::testing::Invocation::Stream { .. }))
        .map(|i| i.command_line())
        .collect();
    assert_eq!(streams[0], "shell 0 vs_debug org.example.app --flag App.dll __DLP_DISABLE_NI__");
    assert_eq!(streams[1], "shell 0 vs_lldblaunch");
    session.stop().await;

    // second launch does not reinstall the debug server
    let LaunchOutcome::Debugging(session) = launcher.launch(&fixture.request).await.unwrap() else {
        panic!("expected a debug session");
    };
    assert_eq!(fixture.bridge.pushes().len(), 1);
    session.stop().await;
}

#[tokio::test]
async fn run_mode_skips_debug_server() {
    let mut fixture = Fixture::new(false);
    fixture.request.debug = false;
    let launcher = fixture.launcher();

    let outcome = launcher.launch(&fixture.request).await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::Running));
    let runs = fixture.bridge.run_commands();
    assert_eq!(runs.len(), 3);
    assert_eq!(runs[2], "shell sh -c \"launch_app org.example.app --flag\"");
}

#[tokio::test]
async fn install_failure_aborts_and_clears_pending() {
    let fixture = Fixture::new(false);
    fixture
        .bridge
        .respond("install", "__return_cb req_id[1] key[end] val[fail]", 0);
    let launcher = fixture.launcher();

    let err = launcher.launch(&fixture.request).await.unwrap_err();
    assert!(matches!(err, LaunchError::Install(InstallResult::Rejected(_))));
    assert!(matches!(launcher.state(), LaunchState::Failed(_)));
    assert!(fixture.pending.get("org.example.app").is_none());
    assert!(
        fixture
            .progress
            .messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.contains("rejected the package"))
    );
    // nothing was launched
    assert!(
        fixture
            .bridge
            .invocations()
            .iter()
            .all(|i| !matches!(i, bridge::testing::Invocation::Stream { .. }))
    );
}

#[tokio::test]
async fn missing_debug_server_is_fatal_only_for_debug() {
    let mut fixture = Fixture::new(false);
    std::fs::remove_dir_all(fixture.sdk_root.join("tools/lldb")).unwrap();

    let launcher = fixture.launcher();
    let err = launcher.launch(&fixture.request).await.unwrap_err();
    assert!(matches!(err, LaunchError::DebugServer(_)));

    fixture.request.debug = false;
    let launcher = fixture.launcher();
    assert!(matches!(
        launcher.launch(&fixture.request).await.unwrap(),
        LaunchOutcome::Running
    ));
}

#[tokio::test]
async fn same_version_is_not_reinstalled_unless_forced() {
    let mut fixture = Fixture::new(false);
    fixture.request.debug = false;
    fixture.request.force_reinstall = false;
    fixture
        .bridge
        .respond("pkginfo --pkg org.example", "pkgid : org.example\nVersion : 1.0.0\n", 0);

    let launcher = fixture.launcher();
    launcher.launch(&fixture.request).await.unwrap();
    assert!(
        fixture
            .bridge
            .run_commands()
            .iter()
            .all(|r| !r.starts_with("install "))
    );
}

#[tokio::test]
async fn widget_launches_through_viewer() {
    let mut fixture = Fixture::new(false);
    fixture.request.debug = false;
    fixture.request.app_type = AppType::Widget;
    fixture.request.extra_args.clear();

    fixture.launcher().launch(&fixture.request).await.unwrap();
    let runs = fixture.bridge.run_commands();
    assert_eq!(
        runs.last().unwrap(),
        "shell sh -c \"launch_app org.tizen.widget_viewer_sdk widget_id org.example.app\""
    );
}

#[tokio::test]
async fn pending_package_used_for_matching_id() {
    let fixture = Fixture::new(false);
    let pending_path = fixture.request.output_dir.join("pending.tpk");
    std::fs::write(&pending_path, b"tpk").unwrap();
    fixture.pending.track(
        "org.example.app",
        PackageRef {
            package_id: "org.example".to_string(),
            version: None,
            path: pending_path.clone(),
        },
    );

    fixture
        .bridge
        .respond("pkginfo --pkg org.example", "pkgid : org.example\nVersion : 0.9.0\n", 0);

    let mut request = fixture.request.clone();
    request.debug = false;
    fixture.launcher().launch(&request).await.unwrap();

    let expected = format!("install {}", pending_path.display());
    assert!(fixture.bridge.run_commands().contains(&expected));
    assert!(Path::new(&pending_path).exists());
    assert!(fixture.pending.get("org.example.app").is_none());
}

#[tokio::test]
async fn pending_package_unknown_to_device_is_not_used() {
    let fixture = Fixture::new(false);
    let pending_path = fixture.request.output_dir.join("pending.tpk");
    std::fs::write(&pending_path, b"tpk").unwrap();
    fixture.pending.track(
        "org.example.app",
        PackageRef {
            package_id: "org.example".to_string(),
            version: None,
            path: pending_path.clone(),
        },
    );
    fixture.bridge.respond("pkginfo --pkg org.example", "", 1);

    let mut request = fixture.request.clone();
    request.debug = false;
    fixture.launcher().launch(&request).await.unwrap();

    let runs = fixture.bridge.run_commands();
    assert!(runs.contains(&format!("install {}", request.package.path.display())));
    assert!(!runs.contains(&format!("install {}", pending_path.display())));
}

#[tokio::test]
async fn rebuilt_package_is_installed_on_next_launch() {
    let fixture = Fixture::new(false);
    fixture
        .bridge
        .respond("pkginfo --pkg org.example", "pkgid : org.example\nVersion : 1.0.0\n", 0);
    let launcher = fixture.launcher();

    let mut first = fixture.request.clone();
    first.debug = false;
    launcher.launch(&first).await.unwrap();
    assert!(fixture.pending.get("org.example.app").is_none());

    let rebuilt = first.output_dir.join("org.example.app-1.0.1.tpk");
    std::fs::write(&rebuilt, b"tpk").unwrap();
    let mut second = first.clone();
    second.force_reinstall = false;
    second.package = PackageRef {
        package_id: "org.example".to_string(),
        version: Some("1.0.1".to_string()),
        path: rebuilt.clone(),
    };
    launcher.launch(&second).await.unwrap();

    let installs: Vec<String> = fixture
        .bridge
        .run_commands()
        .into_iter()
        .filter(|r| r.starts_with("install "))
        .collect();
    assert_eq!(
        installs,
        vec![
            format!("install {}", first.package.path.display()),
            format!("install {}", rebuilt.display()),
        ]
    );
}

#[tokio::test]
async fn benign_output_mentioning_error_still_launches() {
    let mut fixture = Fixture::new(false);
    fixture.request.debug = false;
    fixture.request.app_id = "org.example.errorreporter".to_string();
    fixture.bridge.respond(
        "launch_app org.example.errorreporter",
        "... successfully launched pid = 4321 with debug 0\norg.example.errorreporter launched\n",
        0,
    );

    let outcome = fixture.launcher().launch(&fixture.request).await.unwrap();
    assert!(matches!(outcome, LaunchOutcome::Running));
}

#[tokio::test]
async fn launcher_error_line_fails_the_launch() {
    let mut fixture = Fixture::new(false);
    fixture.request.debug = false;
    fixture
        .bridge
        .respond("launch_app org.example.app", "error: app not found\n", 0);

    let err = fixture.launcher().launch(&fixture.request).await.unwrap_err();
    assert!(matches!(
        err,
        LaunchError::Launch { message, .. } if message.contains("app not found")
    ));
}
