use std::{io, path::PathBuf};

use bridge::BridgeError;

use crate::{
    compilation::{Diagnostic, DocumentId},
    queue::QueueError,
};

#[derive(Debug, thiserror::Error)]
pub enum HotReloadError {
    #[error("no active hot-reload session")]
    NotActive,

    #[error(
        "edit to {} (document {document}) cannot be applied while the application is running: {}",
        .path.display(),
        summarise(.diagnostics)
    )]
    UnsupportedEdit {
        path: PathBuf,
        document: DocumentId,
        diagnostics: Vec<Diagnostic>,
    },

    #[error("compilation model has no projects to add {} to", .0.display())]
    NoProject(PathBuf),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl HotReloadError {
    pub(crate) fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> Self {
        let context = context.into();
        move |source| HotReloadError::Io { context, source }
    }
}

fn summarise(diagnostics: &[Diagnostic]) -> String {
    match diagnostics {
        [] => "no diagnostics".to_string(),
        [only] => only.to_string(),
        [first, rest @ ..] => format!("{first} (and {} more)", rest.len()),
    }
}
