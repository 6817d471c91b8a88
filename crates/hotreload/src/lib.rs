//! Live update of a running application from saved source files.
//!
//! A [`HotReloadManager`] owns one session per debug run. Saved files are fed
//! through a [`FileChangeQueue`] to a single worker which either re-sends
//! markup as concatenated source or compiles code edits into deltas and
//! pushes them to the device.

mod compilation;
mod deltas;
mod error;
mod markup;
mod project;
pub mod queue;
mod session;

pub use compilation::{
    CompilationBackend, CompilationSession, Delta, Diagnostic, DocumentId, EmitResult, NoSession,
    TrackedDocument, UnavailableBackend,
};
pub use deltas::{DELTA_DIR_NAME, DeltaStore, delta_file_names};
pub use error::HotReloadError;
pub use markup::{
    ChangeKind, MarkupPayload, MarkupReloader, MarkupSet, classify, resolve_markup_set,
};
pub use project::{ProjectKind, project_dir};
pub use queue::{
    ChangeOutcome, ChangeProcessor, ChangeReport, FileChangeQueue, PendingFileChange, QueueConfig,
    QueueError,
};
pub use session::{
    DELTA_DEVICE_DIR, HotReloadManager, HotReloadTarget, MARKUP_DEVICE_DIR, NEW_DOCUMENT_DIR,
    SessionInfo, SessionState,
};
