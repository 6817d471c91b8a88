//! Hot-reload session lifecycle and per-change processing.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use bridge::DeviceBridge;
use eyre::WrapErr;
use tokio::{
    sync::{Mutex, mpsc::UnboundedSender, watch},
    task::JoinHandle,
};

use crate::{
    compilation::{CompilationBackend, CompilationSession, DocumentId},
    deltas::DeltaStore,
    error::HotReloadError,
    markup::{ChangeKind, MarkupReloader, classify},
    project::{ProjectKind, project_dir},
    queue::{ChangeProcessor, ChangeReport, FileChangeQueue, PendingFileChange, QueueConfig},
};

/// Device directory watched for markup payloads
pub const MARKUP_DEVICE_DIR: &str = "/home/owner/share/tmp/sdk_tools/.hotreload";
/// Device directory watched for compiled deltas
pub const DELTA_DEVICE_DIR: &str = "/home/owner/share/tmp/sdk_tools/.dotnethotreload";
/// Project-relative directory under which untracked source files are added
pub const NEW_DOCUMENT_DIR: &str = "HotReload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

/// Where a session applies its changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotReloadTarget {
    pub serial: String,
    pub app_id: String,
    /// Project file or directory
    pub project_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub target: HotReloadTarget,
    pub kind: ProjectKind,
    pub project_dir: PathBuf,
    /// Delta working directory; markup sessions have none
    pub work_dir: Option<PathBuf>,
}

struct ActiveSession<B: DeviceBridge, S: CompilationSession> {
    info: SessionInfo,
    queue: FileChangeQueue<ChangeHandler<B, S>>,
}

/// Owns at most one hot-reload session at a time
pub struct HotReloadManager<B: DeviceBridge, C: CompilationBackend> {
    bridge: Arc<B>,
    backend: C,
    config: QueueConfig,
    reports: Option<UnboundedSender<ChangeReport>>,
    state: watch::Sender<SessionState>,
    active: Mutex<Option<ActiveSession<B, C::Session>>>,
}

impl<B: DeviceBridge, C: CompilationBackend> HotReloadManager<B, C> {
    pub fn new(bridge: Arc<B>, backend: C, config: QueueConfig) -> Self {
        let (state, _) = watch::channel(SessionState::Stopped);
        Self {
            bridge,
            backend,
            config,
            reports: None,
            state,
            active: Mutex::new(None),
        }
    }

    /// Receive a [`ChangeReport`] for every processed change
    pub fn with_reports(mut self, reports: UnboundedSender<ChangeReport>) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn session_info(&self) -> Option<SessionInfo> {
        self.active.lock().await.as_ref().map(|s| s.info.clone())
    }

    /// Changes waiting behind the one currently being processed
    pub async fn pending_changes(&self) -> usize {
        self.active
            .lock()
            .await
            .as_ref()
            .map(|s| s.queue.pending())
            .unwrap_or(0)
    }

    /// Begin a session for `target`; does nothing while a session is active
    #[tracing::instrument(
        skip(self, target),
        fields(serial = %target.serial, app_id = %target.app_id)
    )]
    pub async fn start(&self, target: HotReloadTarget) -> eyre::Result<()> {
        let mut active = self.active.lock().await;
        if let Some(current) = active.as_ref() {
            tracing::debug!(active_app = %current.info.target.app_id, "hot reload already active");
            return Ok(());
        }

        self.state.send_replace(SessionState::Starting);
        match self.open(target).await {
            Ok(session) => {
                tracing::info!(
                    kind = ?session.info.kind,
                    project = %session.info.project_dir.display(),
                    "hot reload session active"
                );
                *active = Some(session);
                self.state.send_replace(SessionState::Active);
                Ok(())
            }
            Err(e) => {
                self.state.send_replace(SessionState::Stopped);
                Err(e)
            }
        }
    }

    /// Queue a saved file for processing
    pub async fn on_file_changed(
        &self,
        path: impl Into<PathBuf>,
        root_dir: impl Into<PathBuf>,
    ) -> Result<(), HotReloadError> {
        let active = self.active.lock().await;
        let session = active.as_ref().ok_or(HotReloadError::NotActive)?;
        session
            .queue
            .submit(PendingFileChange::new(path, root_dir))?;
        Ok(())
    }

    /// Finish queued changes, end the compilation session and delete the
    /// working directory. Stopping a stopped manager is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) -> eyre::Result<()> {
        let mut active = self.active.lock().await;
        let Some(session) = active.take() else {
            tracing::trace!("hot reload already stopped");
            return Ok(());
        };

        self.state.send_replace(SessionState::Stopping);
        let result = match session.queue.shutdown().await {
            Ok(handler) => handler.shut_down().await,
            Err(e) => {
                if session.info.work_dir.is_some() {
                    let store = DeltaStore::new(&session.info.project_dir);
                    if let Err(cleanup) = store.remove().await {
                        tracing::warn!(error = %cleanup, "removing delta working directory");
                    }
                }
                Err(eyre::Report::new(e))
            }
        };
        self.state.send_replace(SessionState::Stopped);
        tracing::info!(app_id = %session.info.target.app_id, "hot reload session stopped");
        result
    }

    async fn open(&self, target: HotReloadTarget) -> eyre::Result<ActiveSession<B, C::Session>> {
        let kind = ProjectKind::detect(&target.project_path).wrap_err_with(|| {
            format!("inspecting project {}", target.project_path.display())
        })?;
        let project_dir = project_dir(&target.project_path);
        let markup = MarkupReloader::new().wrap_err("compiling markup attribute pattern")?;

        let compiled = match kind {
            ProjectKind::Markup => None,
            ProjectKind::Compiled => {
                Some(self.open_compilation(&target.project_path, &project_dir).await?)
            }
        };

        let info = SessionInfo {
            work_dir: compiled.as_ref().map(|c| c.store.dir().to_path_buf()),
            project_dir: project_dir.clone(),
            kind,
            target: target.clone(),
        };
        let handler = ChangeHandler {
            bridge: self.bridge.clone(),
            serial: target.serial,
            project_dir,
            markup,
            compiled,
        };
        let queue = FileChangeQueue::spawn(handler, self.config, self.reports.clone());
        Ok(ActiveSession { info, queue })
    }

    async fn open_compilation(
        &self,
        project_path: &Path,
        project_dir: &Path,
    ) -> eyre::Result<Compiled<C::Session>> {
        let store = DeltaStore::new(project_dir);
        store
            .prepare()
            .await
            .wrap_err_with(|| format!("preparing {}", store.dir().display()))?;

        let started = async {
            let mut session = self
                .backend
                .open(project_path)
                .await
                .wrap_err("opening compilation model")?;
            session
                .start()
                .await
                .wrap_err("starting incremental update session")?;
            Ok::<_, eyre::Report>(session)
        }
        .await;

        match started {
            Ok(session) => Ok(Compiled {
                session,
                store,
                publishing: None,
            }),
            Err(e) => {
                if let Err(cleanup) = store.remove().await {
                    tracing::warn!(error = %cleanup, "removing delta working directory");
                }
                Err(e)
            }
        }
    }
}

struct Compiled<S> {
    session: S,
    store: DeltaStore,
    /// Push and commit of the latest update; runs on its own task so an item
    /// timeout cannot cut it short
    publishing: Option<JoinHandle<Result<(), HotReloadError>>>,
}

impl<S: CompilationSession> Compiled<S> {
    /// Push `text` into the model, tracking the file as a new document if
    /// no document of the same name exists in any project
    fn apply_text(
        &mut self,
        path: &Path,
        project_dir: &Path,
        text: &str,
    ) -> eyre::Result<DocumentId> {
        let file_name = path
            .file_name()
            .ok_or_else(|| eyre::eyre!("{} has no file name", path.display()))?;

        let existing = self
            .session
            .documents()
            .into_iter()
            .find(|doc| doc.path.file_name() == Some(file_name));
        if let Some(doc) = existing {
            self.session.update_document(doc.id, text)?;
            return Ok(doc.id);
        }

        let project = self
            .session
            .projects()
            .into_iter()
            .next()
            .ok_or_else(|| HotReloadError::NoProject(path.to_path_buf()))?;
        let synthetic = project_dir.join(NEW_DOCUMENT_DIR).join(file_name);
        tracing::debug!(%project, document = %synthetic.display(), "adding new document");
        self.session.add_document(&project, &synthetic, text)
    }
}

impl<S> Compiled<S> {
    /// Wait for an update that was still publishing when its item timed out
    async fn finish_publishing(&mut self) {
        let Some(previous) = self.publishing.as_mut() else {
            return;
        };
        let result = previous.await;
        self.publishing = None;
        match result {
            Ok(Ok(())) => tracing::debug!("previous update finished publishing"),
            Ok(Err(e)) => tracing::warn!(error = %e, "previous update failed to publish"),
            Err(e) => tracing::warn!(error = %e, "previous update publishing task failed"),
        }
    }
}

/// Push the staged update, then make it the local working copy
async fn publish<B: DeviceBridge>(
    bridge: Arc<B>,
    serial: String,
    store: DeltaStore,
) -> Result<(), HotReloadError> {
    if let Err(e) = bridge.push(&serial, store.staging_dir(), DELTA_DEVICE_DIR).await {
        store.discard_staging().await;
        return Err(e.into());
    }
    store
        .commit()
        .await
        .map_err(HotReloadError::io(format!("updating {}", store.dir().display())))
}

/// Queue worker state: exclusively owns the compilation session
struct ChangeHandler<B, S> {
    bridge: Arc<B>,
    serial: String,
    project_dir: PathBuf,
    markup: MarkupReloader,
    compiled: Option<Compiled<S>>,
}

impl<B: DeviceBridge, S: CompilationSession> ChangeProcessor for ChangeHandler<B, S> {
    async fn process(&mut self, change: &PendingFileChange) -> eyre::Result<()> {
        match classify(&change.path) {
            ChangeKind::Markup => self.reload_markup(change).await,
            ChangeKind::Code => self.apply_code_change(change).await,
            ChangeKind::Ignored => {
                tracing::trace!(path = %change.path.display(), "ignoring change");
                Ok(())
            }
        }
    }
}

impl<B: DeviceBridge, S: CompilationSession> ChangeHandler<B, S> {
    async fn reload_markup(&mut self, change: &PendingFileChange) -> eyre::Result<()> {
        let markup = self.markup.clone();
        let (path, root) = (change.path.clone(), change.root_dir.clone());
        let payload = tokio::task::spawn_blocking(move || markup.prepare(&path, &root))
            .await
            .wrap_err("markup payload task failed")?
            .map_err(HotReloadError::io(format!(
                "preparing markup payload for {}",
                change.path.display()
            )))?;

        self.bridge
            .push(&self.serial, payload.path(), MARKUP_DEVICE_DIR)
            .await
            .map_err(HotReloadError::from)?;
        tracing::info!(path = %change.path.display(), "markup reloaded");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(path = %change.path.display()))]
    async fn apply_code_change(&mut self, change: &PendingFileChange) -> eyre::Result<()> {
        let Some(compiled) = self.compiled.as_mut() else {
            tracing::debug!("no compilation session, ignoring code change");
            return Ok(());
        };
        compiled.finish_publishing().await;

        let text = tokio::fs::read_to_string(&change.path)
            .await
            .map_err(HotReloadError::io(format!("reading {}", change.path.display())))?;
        let document = compiled.apply_text(&change.path, &self.project_dir, &text)?;

        let update = compiled
            .session
            .emit_update()
            .await
            .wrap_err("emitting update")?;
        if !update.diagnostics.is_empty() {
            return Err(HotReloadError::UnsupportedEdit {
                path: change.path.clone(),
                document,
                diagnostics: update.diagnostics,
            }
            .into());
        }

        let store = &compiled.store;
        if let Err(e) = store.stage(&update.deltas).await {
            store.discard_staging().await;
            return Err(HotReloadError::Io {
                context: format!("writing deltas to {}", store.staging_dir().display()),
                source: e,
            }
            .into());
        }

        let publishing = compiled.publishing.insert(tokio::spawn(publish(
            self.bridge.clone(),
            self.serial.clone(),
            store.clone(),
        )));
        let published = publishing.await;
        compiled.publishing = None;
        published.wrap_err("delta publishing task failed")??;

        tracing::info!(%document, deltas = update.deltas.len(), "code change applied");
        Ok(())
    }

    async fn shut_down(mut self) -> eyre::Result<()> {
        if let Some(mut compiled) = self.compiled.take() {
            compiled.finish_publishing().await;
            let Compiled {
                mut session, store, ..
            } = compiled;
            session.end().await;
            store
                .remove()
                .await
                .wrap_err_with(|| format!("removing {}", store.dir().display()))?;
        }
        Ok(())
    }
}
