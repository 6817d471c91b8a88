//! Serialised processing of file-save events.
//!
//! Changes are handled strictly in arrival order by a single worker task.
//! Each item is bounded by a timeout after which it is abandoned, and the
//! channel capacity caps how many changes may wait behind the one in flight.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    path::PathBuf,
    time::Duration,
};

use futures::FutureExt;
use tokio::{
    sync::mpsc::{self, UnboundedSender, error::TrySendError},
    task::JoinHandle,
};
use tracing::Instrument;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(2);

/// One file-save event awaiting processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFileChange {
    pub path: PathBuf,
    pub root_dir: PathBuf,
}

impl PendingFileChange {
    pub fn new(path: impl Into<PathBuf>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            root_dir: root_dir.into(),
        }
    }
}

/// Work performed for every dequeued change.
///
/// The returned future may be dropped part way through when the item times
/// out.
pub trait ChangeProcessor: Send + 'static {
    fn process(
        &mut self,
        change: &PendingFileChange,
    ) -> impl Future<Output = eyre::Result<()>> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub capacity: usize,
    pub item_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueueError {
    #[error("file change queue is full ({capacity} changes pending)")]
    Full { capacity: usize },

    #[error("file change queue is closed")]
    Closed,

    #[error("file change worker terminated abnormally")]
    WorkerGone,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    Applied,
    Failed(String),
    TimedOut,
}

/// Result of processing a single change, emitted after the item is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeReport {
    pub path: PathBuf,
    pub outcome: ChangeOutcome,
}

/// Bounded FIFO of [`PendingFileChange`]s with exactly one worker
pub struct FileChangeQueue<P> {
    sender: mpsc::Sender<PendingFileChange>,
    worker: JoinHandle<P>,
    capacity: usize,
}

impl<P: ChangeProcessor> FileChangeQueue<P> {
    pub fn spawn(
        processor: P,
        config: QueueConfig,
        reports: Option<UnboundedSender<ChangeReport>>,
    ) -> Self {
        let capacity = config.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let worker = tokio::spawn(run_worker(
            processor,
            receiver,
            config.item_timeout,
            reports,
        ));
        Self {
            sender,
            worker,
            capacity,
        }
    }

    /// Enqueue a change without waiting; a full queue rejects the change
    pub fn submit(&self, change: PendingFileChange) -> Result<(), QueueError> {
        self.sender.try_send(change).map_err(|e| match e {
            TrySendError::Full(change) => {
                tracing::warn!(
                    path = %change.path.display(),
                    capacity = self.capacity,
                    "dropping file change, queue full"
                );
                QueueError::Full {
                    capacity: self.capacity,
                }
            }
            TrySendError::Closed(_) => QueueError::Closed,
        })
    }

    /// Number of changes waiting behind the one in flight
    pub fn pending(&self) -> usize {
        self.sender.max_capacity() - self.sender.capacity()
    }

    /// Stop accepting changes, let the worker finish everything already
    /// queued and hand back the processor
    pub async fn shutdown(self) -> Result<P, QueueError> {
        let Self { sender, worker, .. } = self;
        drop(sender);
        worker.await.map_err(|e| {
            tracing::error!(error = %e, "file change worker failed");
            QueueError::WorkerGone
        })
    }
}

async fn run_worker<P: ChangeProcessor>(
    mut processor: P,
    mut receiver: mpsc::Receiver<PendingFileChange>,
    item_timeout: Duration,
    reports: Option<UnboundedSender<ChangeReport>>,
) -> P {
    while let Some(change) = receiver.recv().await {
        let span = tracing::debug_span!("file_change", path = %change.path.display());
        let work = AssertUnwindSafe(processor.process(&change)).catch_unwind();
        let outcome = match tokio::time::timeout(item_timeout, work)
            .instrument(span)
            .await
        {
            Ok(Ok(Ok(()))) => {
                tracing::debug!(path = %change.path.display(), "file change applied");
                ChangeOutcome::Applied
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    path = %change.path.display(),
                    error = %format!("{e:#}"),
                    "processing file change"
                );
                ChangeOutcome::Failed(format!("{e:#}"))
            }
            Ok(Err(panic)) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(
                    path = %change.path.display(),
                    %message,
                    "file change processor panicked"
                );
                ChangeOutcome::Failed(format!("panicked: {message}"))
            }
            Err(_) => {
                tracing::warn!(
                    path = %change.path.display(),
                    timeout = ?item_timeout,
                    "abandoning file change after timeout"
                );
                ChangeOutcome::TimedOut
            }
        };

        if let Some(reports) = &reports {
            let _ = reports.send(ChangeReport {
                path: change.path,
                outcome,
            });
        }
    }
    tracing::debug!("file change queue drained");
    processor
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
