//! Seam to the incremental compiler that produces edit-and-continue deltas.
//!
//! The concrete compiler is an external collaborator. Hosts inject a
//! [`CompilationBackend`]; [`UnavailableBackend`] is used where none exists,
//! which limits hot reload to markup projects.

use std::{
    fmt,
    future::Future,
    path::{Path, PathBuf},
};

use bytes::Bytes;
use uuid::Uuid;

/// Identity of a source document inside the compilation model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(pub usize);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedDocument {
    pub id: DocumentId,
    pub project: String,
    pub path: PathBuf,
}

/// One module's worth of update payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub module_id: Uuid,
    pub il: Bytes,
    pub metadata: Bytes,
    pub pdb: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub id: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.id, self.message)
    }
}

/// Output of a single emit; any diagnostic means the edit cannot be applied
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmitResult {
    pub deltas: Vec<Delta>,
    pub diagnostics: Vec<Diagnostic>,
}

/// A live incremental-update session over one project's compilation model
pub trait CompilationSession: Send + 'static {
    fn documents(&self) -> Vec<TrackedDocument>;

    fn projects(&self) -> Vec<String>;

    /// Replace the full text of a tracked document
    fn update_document(&mut self, id: DocumentId, text: &str) -> eyre::Result<()>;

    fn add_document(&mut self, project: &str, path: &Path, text: &str)
    -> eyre::Result<DocumentId>;

    fn start(&mut self) -> impl Future<Output = eyre::Result<()>> + Send;

    /// Compute deltas for all document changes applied since the last emit
    fn emit_update(&mut self) -> impl Future<Output = eyre::Result<EmitResult>> + Send;

    fn end(&mut self) -> impl Future<Output = ()> + Send;
}

/// Opens compilation sessions for projects
pub trait CompilationBackend: Send + Sync + 'static {
    type Session: CompilationSession;

    fn open(
        &self,
        project_path: &Path,
    ) -> impl Future<Output = eyre::Result<Self::Session>> + Send;
}

/// Backend for hosts without an incremental compiler
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableBackend;

/// Session type of [`UnavailableBackend`]; it cannot be constructed
#[derive(Debug)]
pub enum NoSession {}

impl CompilationBackend for UnavailableBackend {
    type Session = NoSession;

    async fn open(&self, project_path: &Path) -> eyre::Result<NoSession> {
        eyre::bail!(
            "no incremental compiler available for {}; only markup projects can be hot reloaded",
            project_path.display()
        )
    }
}

impl CompilationSession for NoSession {
    fn documents(&self) -> Vec<TrackedDocument> {
        match *self {}
    }

    fn projects(&self) -> Vec<String> {
        match *self {}
    }

    fn update_document(&mut self, _id: DocumentId, _text: &str) -> eyre::Result<()> {
        match *self {}
    }

    fn add_document(
        &mut self,
        _project: &str,
        _path: &Path,
        _text: &str,
    ) -> eyre::Result<DocumentId> {
        match *self {}
    }

    async fn start(&mut self) -> eyre::Result<()> {
        match *self {}
    }

    async fn emit_update(&mut self) -> eyre::Result<EmitResult> {
        match *self {}
    }

    async fn end(&mut self) {
        match *self {}
    }
}
