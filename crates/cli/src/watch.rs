use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use eyre::WrapErr;
use hotreload::{
    ChangeKind, ChangeOutcome, DELTA_DIR_NAME, HotReloadError, HotReloadManager, HotReloadTarget,
    QueueConfig, UnavailableBackend, classify, project_dir,
};
use notify::{
    EventKind, RecursiveMode, Watcher,
    event::{ModifyKind, RenameMode},
};
use tokio::sync::mpsc;

use crate::{args::WatchArgs, environment::Environment};

/// Editors emit several events per save; repeats inside this window are dropped
const SAVE_WINDOW: Duration = Duration::from_millis(250);

fn is_save(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(ModifyKind::Data(_))
            | EventKind::Modify(ModifyKind::Any)
            | EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both))
    )
}

/// Drops repeated events for the same file
#[derive(Debug, Default)]
struct SaveFilter {
    last_seen: HashMap<PathBuf, Instant>,
}

impl SaveFilter {
    fn accept(&mut self, path: &Path, now: Instant) -> bool {
        match self.last_seen.get(path) {
            Some(seen) if now.duration_since(*seen) < SAVE_WINDOW => false,
            _ => {
                self.last_seen.insert(path.to_path_buf(), now);
                true
            }
        }
    }
}

fn is_build_output(path: &Path, root: &Path) -> bool {
    path.strip_prefix(root)
        .ok()
        .and_then(|relative| relative.components().next())
        .is_some_and(|first| {
            let first = first.as_os_str();
            first == "bin" || first == "obj" || first == DELTA_DIR_NAME
        })
}

pub async fn run(env: &Environment, args: WatchArgs) -> eyre::Result<()> {
    env.refresh(args.serial.as_deref()).await?;
    let device = env
        .registry
        .selected_device()
        .ok_or_else(|| eyre::eyre!("no device attached to hot reload into"))?;

    let (reports_tx, mut reports) = mpsc::unbounded_channel();
    let queue = QueueConfig {
        capacity: env.config.hot_reload.queue_capacity,
        item_timeout: env.config.hot_reload.item_timeout(),
    };
    let manager = HotReloadManager::new(env.bridge.clone(), UnavailableBackend, queue)
        .with_reports(reports_tx);
    manager
        .start(HotReloadTarget {
            serial: device.serial.clone(),
            app_id: args.app_id.clone(),
            project_path: args.project.clone(),
        })
        .await
        .wrap_err("starting hot reload session")?;

    let root = project_dir(&args.project);
    let (events_tx, mut events) = mpsc::unbounded_channel();
    let mut watcher =
        notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) if is_save(&event.kind) => {
                for path in event.paths {
                    let _ = events_tx.send(path);
                }
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "file watcher error"),
        })
        .wrap_err("creating file watcher")?;
    watcher
        .watch(&root, RecursiveMode::Recursive)
        .wrap_err_with(|| format!("watching {}", root.display()))?;
    println!(
        "hot reloading {} on {} from {} (Ctrl-C to stop)",
        args.app_id,
        device.serial,
        root.display()
    );

    let monitor = env.monitor();
    let mut selection = env.registry.subscribe();
    let mut filter = SaveFilter::default();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            changed = selection.changed() => {
                if changed.is_err() || env.is_detached(&device.serial) {
                    println!("device {} disconnected, stopping hot reload", device.serial);
                    break;
                }
            }
            Some(path) = events.recv() => {
                if classify(&path) == ChangeKind::Ignored
                    || is_build_output(&path, &root)
                    || !filter.accept(&path, Instant::now())
                {
                    continue;
                }
                match manager.on_file_changed(path.clone(), root.clone()).await {
                    Ok(()) => {}
                    Err(HotReloadError::Queue(e)) => {
                        tracing::warn!(error = %e, path = %path.display(), "change dropped")
                    }
                    Err(e) => return Err(eyre::Report::new(e).wrap_err("queueing file change")),
                }
            }
            Some(report) = reports.recv() => match report.outcome {
                ChangeOutcome::Applied => println!("reloaded {}", report.path.display()),
                ChangeOutcome::Failed(message) => {
                    println!("could not reload {}: {message}", report.path.display())
                }
                ChangeOutcome::TimedOut => {
                    println!("reloading {} timed out", report.path.display())
                }
            },
        }
    }

    drop(watcher);
    monitor.stop().await;
    manager.stop().await.wrap_err("stopping hot reload session")
}

#[cfg(test)]
mod tests {
    use notify::event::{CreateKind, DataChange, MetadataKind};

    use super::*;

    #[test]
    fn save_events() {
        assert!(is_save(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(is_save(&EventKind::Create(CreateKind::File)));
        assert!(is_save(&EventKind::Modify(ModifyKind::Name(RenameMode::To))));
        assert!(!is_save(&EventKind::Modify(ModifyKind::Metadata(MetadataKind::AccessTime))));
        assert!(!is_save(&EventKind::Modify(ModifyKind::Name(RenameMode::From))));
    }

    #[test]
    fn repeated_saves_are_collapsed() {
        let mut filter = SaveFilter::default();
        let start = Instant::now();
        let page = Path::new("/app/Views/MainPage.xaml");
        assert!(filter.accept(page, start));
        assert!(!filter.accept(page, start + Duration::from_millis(10)));
        assert!(filter.accept(Path::new("/app/App.cs"), start + Duration::from_millis(10)));
        assert!(filter.accept(page, start + SAVE_WINDOW + Duration::from_millis(1)));
    }

    #[test]
    fn build_output_is_skipped() {
        let root = Path::new("/app");
        assert!(is_build_output(Path::new("/app/obj/Debug/MainPage.xaml.g.cs"), root));
        assert!(is_build_output(Path::new("/app/deltas/tmp_il0.il"), root));
        assert!(!is_build_output(Path::new("/app/Views/MainPage.xaml"), root));
    }
}
