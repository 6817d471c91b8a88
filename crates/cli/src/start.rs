use std::{path::Path, sync::Arc, time::Duration};

use eyre::WrapErr;
use hotreload::project_dir;
use launch::{
    CommandEmulator, LaunchError, LaunchOutcome, LaunchRequest, LaunchSettings, Launcher,
    PackageRef, PendingPackages, Progress,
};
use tokio::sync::mpsc;

use crate::{args::LaunchArgs, environment::Environment};

/// Prints installer and launcher progress for the user
struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn report(&self, message: &str) {
        tracing::debug!(%message, "progress");
        println!("{message}");
    }
}

fn default_exe_name(project: &Path) -> String {
    let name = if project.extension().is_some_and(|e| e == "csproj") {
        project.file_stem()
    } else {
        project.file_name()
    };
    name.map(|n| format!("{}.dll", n.to_string_lossy()))
        .unwrap_or_else(|| "App.dll".to_string())
}

fn request(env: &Environment, args: &LaunchArgs) -> LaunchRequest {
    let output_dir = args.output_dir.clone().unwrap_or_else(|| {
        args.package
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| project_dir(&args.project))
    });

    let mut extra_args = env.config.launch.app_args.clone();
    extra_args.extend(args.app_args.iter().cloned());

    LaunchRequest {
        app_id: args.app_id.clone(),
        app_type: args.app_type,
        package: PackageRef {
            package_id: args
                .package_id
                .clone()
                .unwrap_or_else(|| args.app_id.clone()),
            version: args.package_version.clone(),
            path: args.package.clone(),
        },
        output_dir,
        exe_name: args
            .exe
            .clone()
            .unwrap_or_else(|| default_exe_name(&args.project)),
        extra_args,
        debug: args.debug,
        force_reinstall: args.force,
    }
}

pub async fn run(env: &Environment, args: LaunchArgs) -> eyre::Result<()> {
    env.refresh(args.serial.as_deref()).await?;

    let (lines_tx, mut lines) = mpsc::unbounded_channel();
    let launcher = Launcher::new(
        env.bridge.clone(),
        env.registry.clone(),
        Arc::new(PendingPackages::default()),
        CommandEmulator::new(env.config.emulator.command.clone()),
        LaunchSettings {
            sdk_root: env.config.launch.sdk_root.clone(),
            disable_native_images: env.config.launch.disable_native_images,
        },
        Arc::new(ConsoleProgress),
    )
    .with_line_sink(lines_tx);

    if !launcher.can_launch() {
        return Err(LaunchError::BridgeUnavailable.into());
    }

    let request = request(env, &args);
    tracing::debug!(?request, "launching");
    let outcome = launcher
        .launch(&request)
        .await
        .wrap_err_with(|| format!("launching {}", request.app_id))?;

    match outcome {
        LaunchOutcome::EmulatorRequested => {
            println!(
                "no device attached; an emulator is starting, launch again once it has booted"
            );
        }
        LaunchOutcome::Running => {}
        LaunchOutcome::Debugging(session) => {
            println!("debug engine options:\n{}", session.engine_options);
            println!("streaming debugger output (Ctrl-C to stop)");

            let serial = env.registry.selected_device().map(|d| d.serial);
            let monitor = env.monitor();
            let mut selection = env.registry.subscribe();
            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            let mut ticker = tokio::time::interval(Duration::from_millis(500));
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => break,
                    changed = selection.changed() => {
                        let detached = serial.as_deref().is_none_or(|s| env.is_detached(s));
                        if changed.is_err() || detached {
                            println!("target device disconnected");
                            break;
                        }
                    }
                    Some(line) = lines.recv() => println!("{line}"),
                    _ = ticker.tick() => {
                        if session.is_finished() {
                            tracing::info!("debugger exited");
                            break;
                        }
                    }
                }
            }
            monitor.stop().await;
            session.stop().await;
        }
    }
    Ok(())
}
