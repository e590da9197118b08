use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::UploadClient;
use crate::error::{Result, UploadError};
use crate::file::FileHandle;
use crate::rest_types::UploadResult;
use crate::session::{SessionSnapshot, UploadEvent, UploadOptions, UploadSession};

type ProgressFn = Box<dyn FnMut(u8) + Send>;
type MessageFn = Box<dyn FnOnce(String) + Send>;

/// Hooks for a front end. None of them fire once the upload is cancelled.
pub struct UploadCallbacks {
    on_progress: ProgressFn,
    on_complete: MessageFn,
    on_error: MessageFn,
}

impl UploadCallbacks {
    pub fn new() -> Self {
        Self {
            on_progress: Box::new(|_: u8| {}),
            on_complete: Box::new(|_: String| {}),
            on_error: Box::new(|_: String| {}),
        }
    }

    /// Called with the completed percentage after every stored part.
    pub fn on_progress(mut self, f: impl FnMut(u8) + Send + 'static) -> Self {
        self.on_progress = Box::new(f);
        self
    }

    /// Called with the stored object's location.
    pub fn on_complete(mut self, f: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_complete = Box::new(f);
        self
    }

    pub fn on_error(mut self, f: impl FnOnce(String) + Send + 'static) -> Self {
        self.on_error = Box::new(f);
        self
    }
}

impl Default for UploadCallbacks {
    fn default() -> Self {
        Self::new()
    }
}

/// A running upload started by [`Uploader::start_upload`].
pub struct UploadHandle {
    cancel: CancellationToken,
    snapshot_rx: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<Result<UploadResult>>,
}

impl UploadHandle {
    /// Stops the upload: no new parts are sent, in-flight requests are
    /// dropped and no further callbacks run.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub async fn join(self) -> Result<UploadResult> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(UploadError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

/// Reports the terminal outcome. A result the server already produced is
/// returned even if cancellation raced it, but no callback runs once cancelled.
fn settle(
    outcome: Result<UploadResult>,
    cancelled: bool,
    on_complete: MessageFn,
    on_error: MessageFn,
) -> Result<UploadResult> {
    match outcome {
        Ok(result) => {
            if cancelled {
                debug!(location = %result.location, "Upload finished before cancellation took effect");
            } else {
                on_complete(result.location.clone());
            }
            Ok(result)
        }
        Err(_) if cancelled => {
            debug!("Upload cancelled, skipping callbacks");
            Err(UploadError::Cancelled)
        }
        Err(e) => {
            on_error(e.message());
            Err(e)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Uploader {
    client: Arc<UploadClient>,
    options: UploadOptions,
}

impl Uploader {
    pub fn new(client: UploadClient, options: UploadOptions) -> Self {
        Self {
            client: Arc::new(client),
            options,
        }
    }

    pub fn options(&self) -> &UploadOptions {
        &self.options
    }

    pub fn session<F: FileHandle>(
        &self,
        file: F,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> UploadSession<F> {
        UploadSession::new(
            self.client.clone(),
            file,
            filename,
            mime_type,
            self.options.clone(),
        )
    }

    pub async fn upload<F: FileHandle>(
        &self,
        file: F,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
    ) -> Result<UploadResult> {
        self.session(file, filename, mime_type).run().await
    }

    /// Starts the upload on the current tokio runtime and reports through
    /// `callbacks`.
    pub fn start_upload<F: FileHandle>(
        &self,
        file: F,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        callbacks: UploadCallbacks,
    ) -> UploadHandle {
        let session = self.session(file, filename, mime_type);
        let cancel = session.cancel_token();
        let snapshot_rx = session.subscribe();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            let UploadCallbacks {
                mut on_progress,
                on_complete,
                on_error,
            } = callbacks;

            let mut events = session.events();
            let mut outcome = Err(UploadError::protocol("upload ended without a result"));

            while let Some(event) = events.next().await {
                match event {
                    Ok(UploadEvent::Progress(progress)) => {
                        if !task_cancel.is_cancelled() {
                            on_progress(progress.percent);
                        }
                    }
                    Ok(UploadEvent::Completed(result)) => outcome = Ok(result),
                    Ok(_) => {}
                    Err(e) => outcome = Err(e),
                }
            }

            settle(outcome, task_cancel.is_cancelled(), on_complete, on_error)
        });

        UploadHandle {
            cancel,
            snapshot_rx,
            task,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn flag_callback(flag: &Arc<AtomicBool>) -> MessageFn {
        let flag = flag.clone();
        Box::new(move |_: String| flag.store(true, Ordering::SeqCst))
    }

    fn stored() -> UploadResult {
        UploadResult {
            location: "https://cdn.example.com/a.bin".into(),
        }
    }

    #[test]
    fn test_completed_result_survives_late_cancel() {
        let fired = Arc::new(AtomicBool::new(false));
        let result = settle(Ok(stored()), true, flag_callback(&fired), flag_callback(&fired));

        assert_eq!(result.unwrap(), stored());
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_completion_reported_when_not_cancelled() {
        let completed = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let result = settle(Ok(stored()), false, flag_callback(&completed), flag_callback(&failed));

        assert!(result.is_ok());
        assert!(completed.load(Ordering::SeqCst));
        assert!(!failed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failure_after_cancel_is_cancelled() {
        let fired = Arc::new(AtomicBool::new(false));
        let result = settle(
            Err(UploadError::Network("reset".into())),
            true,
            flag_callback(&fired),
            flag_callback(&fired),
        );

        assert!(matches!(result, Err(UploadError::Cancelled)));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn test_failure_reports_server_message() {
        let message = Arc::new(std::sync::Mutex::new(None));
        let sink = message.clone();
        let result = settle(
            Err(UploadError::Client {
                status: 403,
                message: "quota exceeded".into(),
            }),
            false,
            Box::new(|_: String| {}),
            Box::new(move |m: String| *sink.lock().unwrap() = Some(m)),
        );

        assert!(result.is_err());
        assert_eq!(message.lock().unwrap().as_deref(), Some("quota exceeded"));
    }
}
