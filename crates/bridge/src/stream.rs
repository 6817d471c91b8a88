use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::mpsc,
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;

/// Receives each output line of a streaming command
pub type LineSink = mpsc::UnboundedSender<String>;

/// Handle to a streaming bridge process.
///
/// The process is killed when the handle is cancelled or dropped, so the
/// lifetime of the device-side stream is tied to whoever owns the handle.
pub struct StreamHandle {
    label: String,
    cancel: CancellationToken,
    task: Option<JoinHandle<Option<i32>>>,
}

impl StreamHandle {
    pub(crate) fn from_child(
        label: impl Into<String>,
        mut child: Child,
        sink: Option<LineSink>,
    ) -> Self {
        let label = label.into();
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let mut forwarders = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_lines(stdout, label.clone(), sink.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_lines(stderr, label.clone(), sink)));
        }

        let task_label = label.clone();
        let task = tokio::spawn(async move {
            let finished = tokio::select! {
                _ = token.cancelled() => None,
                status = child.wait() => Some(status),
            };
            let code = match finished {
                None => {
                    tracing::debug!(source = %task_label, "cancelling stream");
                    if let Err(e) = child.kill().await {
                        tracing::warn!(
                            error = %e,
                            source = %task_label,
                            "could not kill stream process"
                        );
                    }
                    for forwarder in &forwarders {
                        forwarder.abort();
                    }
                    None
                }
                Some(Ok(status)) => status.code(),
                Some(Err(e)) => {
                    tracing::warn!(error = %e, source = %task_label, "waiting for stream process");
                    None
                }
            };
            for forwarder in forwarders {
                let _ = forwarder.await;
            }
            tracing::debug!(source = %task_label, exit_code = ?code, "stream finished");
            code
        });

        Self {
            label,
            cancel,
            task: Some(task),
        }
    }

    /// Wrap an arbitrary task; used by in-memory bridges
    #[cfg_attr(not(any(test, feature = "testing")), allow(dead_code))]
    pub(crate) fn from_task(
        label: impl Into<String>,
        cancel: CancellationToken,
        task: JoinHandle<Option<i32>>,
    ) -> Self {
        Self {
            label: label.into(),
            cancel,
            task: Some(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Request termination of the underlying process
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|task| task.is_finished())
    }

    /// Wait for the process to exit and return its exit code
    pub async fn wait(mut self) -> Option<i32> {
        let task = self.task.take()?;
        task.await.ok().flatten()
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            self.cancel.cancel();
        }
    }
}

impl std::fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("label", &self.label)
            .field("finished", &self.is_finished())
            .finish()
    }
}

async fn forward_lines<R>(reader: R, label: String, sink: Option<LineSink>)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                tracing::info!(target: "device_output", source = %label, "{line}");
                if let Some(sink) = &sink {
                    let _ = sink.send(line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, source = %label, "stream read error");
                break;
            }
        }
    }
}
