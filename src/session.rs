//! Lifecycle of a single multipart upload.
//!
//! A session moves through `Idle -> Initiating -> InProgress -> Completing ->
//! Completed`, or ends in `Failed` / `Aborted`. It is the only writer of its
//! [`UploadSessionState`]; observers get snapshots through
//! [`UploadSession::subscribe`].

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::UploadClient;
use crate::error::{Result, UploadError};
use crate::file::FileHandle;
use crate::plan::{self, DEFAULT_CHUNK_SIZE_BYTES, PartRange};
use crate::rest_types::{CompletedPart, UploadResult};
use crate::retry::RetryConfig;
use crate::transfer::TransferEngine;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Idle,
    Initiating,
    InProgress,
    Completing,
    Completed,
    Failed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Failed | SessionStatus::Aborted
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSessionState {
    pub upload_id: String,
    pub filename: String,
    pub mime_type: String,
    /// Strictly increasing by part number.
    pub completed_parts: Vec<CompletedPart>,
    pub total_parts: u32,
    pub bytes_uploaded: u64,
}

impl UploadSessionState {
    pub fn is_complete(&self) -> bool {
        self.completed_parts.len() == self.total_parts as usize
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Present once the server has issued an upload id.
    pub state: Option<UploadSessionState>,
}

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub chunk_size: u64,
    /// Parts in flight at once. `1` uploads strictly one after another.
    pub concurrency: usize,
    pub retry: RetryConfig,
    /// Emit [`UploadEvent::Transferred`] as body bytes are handed to the transport.
    pub byte_progress: bool,
    /// Ask the server to discard stored parts when the upload fails or is cancelled.
    pub abort_on_failure: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE_BYTES,
            concurrency: 1,
            retry: RetryConfig::default(),
            byte_progress: false,
            abort_on_failure: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadProgress {
    pub percent: u8,
    pub completed_parts: u32,
    pub total_parts: u32,
    pub bytes_uploaded: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Initiated {
        upload_id: String,
        total_parts: u32,
        total_bytes: u64,
    },
    /// Body bytes handed to the transport since the previous event.
    Transferred { bytes: u64 },
    Progress(UploadProgress),
    Completed(UploadResult),
}

/// `round(100 * completed / total)` with halves rounded away from zero.
pub fn progress_percent(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    ((200 * completed + total) / (2 * total)) as u8
}

/// Checks the list sent to the completion endpoint: ascending, no duplicates,
/// nothing missing.
pub fn check_part_order(parts: &[CompletedPart], total_parts: u32) -> Result<()> {
    if parts.len() != total_parts as usize {
        return Err(UploadError::protocol(format!(
            "{} of {} parts were stored",
            parts.len(),
            total_parts
        )));
    }
    for (index, part) in parts.iter().enumerate() {
        if part.part_number as usize != index + 1 {
            return Err(UploadError::protocol(format!(
                "part {} found at position {}",
                part.part_number,
                index + 1
            )));
        }
    }
    Ok(())
}

pub struct UploadSession<F: FileHandle> {
    engine: TransferEngine,
    file: Arc<F>,
    filename: String,
    mime_type: String,
    options: UploadOptions,
    cancel: CancellationToken,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<F: FileHandle> UploadSession<F> {
    pub fn new(
        client: Arc<UploadClient>,
        file: F,
        filename: impl Into<String>,
        mime_type: impl Into<String>,
        options: UploadOptions,
    ) -> Self {
        let (snapshot_tx, _) = watch::channel(SessionSnapshot::default());

        Self {
            engine: TransferEngine::new(client, options.retry.clone()),
            file: Arc::new(file),
            filename: filename.into(),
            mime_type: mime_type.into(),
            options,
            cancel: CancellationToken::new(),
            snapshot_tx,
        }
    }

    /// Shares the session's token, so cancelling a clone cancels the upload.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Runs the upload, returning the stored object's location.
    pub async fn run(self) -> Result<UploadResult> {
        self.run_with(|_| {}).await
    }

    pub async fn run_with(self, mut on_event: impl FnMut(&UploadEvent)) -> Result<UploadResult> {
        let mut events = self.events();
        while let Some(event) = events.next().await {
            let event = event?;
            on_event(&event);
            if let UploadEvent::Completed(result) = event {
                return Ok(result);
            }
        }
        Err(UploadError::protocol("upload ended without a result"))
    }

    /// Drives the upload as a stream. The stream ends after a `Completed`
    /// event or after the first error.
    pub fn events(self) -> BoxStream<'static, Result<UploadEvent>> {
        let stream = async_stream::stream! {
            let inner = self.drive();
            futures::pin_mut!(inner);

            while let Some(item) = inner.next().await {
                match item {
                    Ok(event) => yield Ok(event),
                    Err(error) => {
                        self.finish_with_error(&error).await;
                        yield Err(error);
                        break;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    fn drive(&self) -> impl Stream<Item = Result<UploadEvent>> + Send + '_ {
        async_stream::try_stream! {
            if self.options.concurrency == 0 {
                Err(UploadError::validation("concurrency must be at least 1"))?;
            }
            let plan = plan::plan(self.file.size(), self.options.chunk_size)?;
            let total_parts = plan.total_parts();
            let total_bytes = plan.file_size();

            self.set_status(SessionStatus::Initiating);
            let upload_id = cancellable(
                &self.cancel,
                self.engine.client().initiate(&self.filename, &self.mime_type),
            )
            .await?;

            self.snapshot_tx.send_modify(|snapshot| {
                snapshot.status = SessionStatus::InProgress;
                snapshot.state = Some(UploadSessionState {
                    upload_id: upload_id.clone(),
                    filename: self.filename.clone(),
                    mime_type: self.mime_type.clone(),
                    completed_parts: Vec::new(),
                    total_parts,
                    bytes_uploaded: 0,
                });
            });
            info!(
                upload_id = %upload_id,
                filename = %self.filename,
                total_parts,
                total_bytes,
                "Upload started"
            );

            yield UploadEvent::Initiated {
                upload_id: upload_id.clone(),
                total_parts,
                total_bytes,
            };

            let (progress_tx, mut progress_rx) = mpsc::channel::<u64>(64);
            let progress_tx = self.options.byte_progress.then_some(progress_tx);

            let upload_id_ref = upload_id.as_str();
            let mut parts = futures::stream::iter(plan)
                .map(|range| self.transfer_part(upload_id_ref, range, progress_tx.clone()))
                .buffer_unordered(self.options.concurrency);

            // Parts that finished ahead of a lower-numbered one wait here so
            // they are recorded in ascending order.
            let mut finished: BTreeMap<u32, (PartRange, CompletedPart)> = BTreeMap::new();
            let mut completed = 0u32;
            let mut bytes_uploaded = 0u64;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => None,
                    Some(bytes) = progress_rx.recv() => {
                        yield UploadEvent::Transferred { bytes };
                        continue;
                    }
                    next = parts.next() => Some(next),
                };

                let next = match next {
                    Some(next) => next,
                    None => Err(UploadError::Cancelled)?,
                };
                let Some(result) = next else {
                    break;
                };
                // The first failure ends the stream; dropping `parts` cancels
                // the requests still in flight.
                let (range, part) = result?;
                finished.insert(range.part_number, (range, part));

                while let Some((range, part)) = finished.remove(&(completed + 1)) {
                    completed += 1;
                    bytes_uploaded += range.len();
                    self.snapshot_tx.send_modify(|snapshot| {
                        if let Some(state) = snapshot.state.as_mut() {
                            state.completed_parts.push(part);
                            state.bytes_uploaded = bytes_uploaded;
                        }
                    });

                    if self.cancel.is_cancelled() {
                        Err(UploadError::Cancelled)?;
                    }

                    yield UploadEvent::Progress(UploadProgress {
                        percent: progress_percent(completed, total_parts),
                        completed_parts: completed,
                        total_parts,
                        bytes_uploaded,
                        total_bytes,
                    });
                }
            }

            drop(parts);
            drop(progress_tx);

            let completed_parts = {
                let snapshot = self.snapshot_tx.borrow();
                snapshot
                    .state
                    .as_ref()
                    .map(|state| state.completed_parts.clone())
                    .unwrap_or_default()
            };
            check_part_order(&completed_parts, total_parts)?;

            self.set_status(SessionStatus::Completing);
            debug!(upload_id = %upload_id, parts = completed_parts.len(), "Completing upload");
            let result = cancellable(
                &self.cancel,
                self.engine
                    .client()
                    .complete(&upload_id, &self.filename, &completed_parts),
            )
            .await?;

            self.set_status(SessionStatus::Completed);
            info!(upload_id = %upload_id, location = %result.location, "Upload completed");

            yield UploadEvent::Completed(result);
        }
    }

    async fn transfer_part(
        &self,
        upload_id: &str,
        range: PartRange,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<(PartRange, CompletedPart)> {
        let data = self.file.read_range(range.start, range.end).await?;
        let part = self
            .engine
            .submit_part(upload_id, range.part_number, &self.filename, data, progress_tx)
            .await?;
        Ok((range, part))
    }

    fn set_status(&self, status: SessionStatus) {
        self.snapshot_tx.send_modify(|snapshot| snapshot.status = status);
    }

    async fn finish_with_error(&self, error: &UploadError) {
        let status = match error {
            UploadError::Cancelled => SessionStatus::Aborted,
            _ => SessionStatus::Failed,
        };
        let upload_id = self
            .snapshot_tx
            .borrow()
            .state
            .as_ref()
            .map(|state| state.upload_id.clone());
        self.set_status(status);

        match status {
            SessionStatus::Aborted => info!(filename = %self.filename, "Upload cancelled"),
            _ => warn!(filename = %self.filename, error = %error, "Upload failed"),
        }

        // Stored parts stay on the server unless it is told to drop them.
        if let (true, Some(upload_id)) = (self.options.abort_on_failure, upload_id) {
            if let Err(e) = self.engine.client().abort(&upload_id).await {
                warn!(upload_id = %upload_id, error = %e, "Failed to abort upload");
            }
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    operation: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(UploadError::Cancelled),
        result = operation => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn part(part_number: u32) -> CompletedPart {
        CompletedPart {
            part_number,
            e_tag: format!("etag-{}", part_number),
        }
    }

    #[test_case(1, 3, 33)]
    #[test_case(2, 3, 67)]
    #[test_case(3, 3, 100)]
    #[test_case(1, 8, 13 ; "half rounds up")]
    #[test_case(1, 200, 1 ; "exact half")]
    #[test_case(1, 201, 0)]
    #[test_case(0, 5, 0)]
    #[test_case(1, 1, 100)]
    fn test_progress_percent(completed: u32, total: u32, expected: u8) {
        assert_eq!(progress_percent(completed, total), expected);
    }

    #[test]
    fn test_progress_percent_is_monotonic() {
        for total in 1..50 {
            let mut last = 0;
            for completed in 1..=total {
                let percent = progress_percent(completed, total);
                assert!(percent >= last);
                last = percent;
            }
            assert_eq!(last, 100);
        }
    }

    #[test]
    fn test_part_order_accepts_sequence() {
        assert!(check_part_order(&[part(1), part(2), part(3)], 3).is_ok());
    }

    #[test]
    fn test_part_order_rejects_gaps_and_duplicates() {
        assert!(check_part_order(&[part(1), part(3)], 2).is_err());
        assert!(check_part_order(&[part(1), part(1)], 2).is_err());
        assert!(check_part_order(&[part(2), part(1)], 2).is_err());
        assert!(check_part_order(&[part(1)], 2).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
        assert!(SessionStatus::Aborted.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(!SessionStatus::default().is_terminal());
    }

    #[test]
    fn test_state_completeness() {
        let mut state = UploadSessionState {
            upload_id: "u".into(),
            filename: "f".into(),
            mime_type: "text/plain".into(),
            completed_parts: vec![part(1)],
            total_parts: 2,
            bytes_uploaded: 5,
        };
        assert!(!state.is_complete());
        state.completed_parts.push(part(2));
        assert!(state.is_complete());
    }

    #[tokio::test]
    async fn test_zero_chunk_size_fails_before_any_request() {
        let client = Arc::new(UploadClient::new(
            url::Url::parse("http://127.0.0.1:9").unwrap(),
        ));
        let options = UploadOptions {
            chunk_size: 0,
            ..Default::default()
        };
        let session = UploadSession::new(client, b"data".to_vec(), "a.txt", "text/plain", options);
        let snapshots = session.subscribe();

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, UploadError::Validation(_)));
        assert_eq!(snapshots.borrow().status, SessionStatus::Failed);
        assert!(snapshots.borrow().state.is_none());
    }

    #[tokio::test]
    async fn test_cancel_before_start_aborts() {
        let client = Arc::new(UploadClient::new(
            url::Url::parse("http://127.0.0.1:9").unwrap(),
        ));
        let session = UploadSession::new(
            client,
            b"data".to_vec(),
            "a.txt",
            "text/plain",
            UploadOptions::default(),
        );
        let snapshots = session.subscribe();
        session.cancel_token().cancel();

        let err = session.run().await.unwrap_err();
        assert!(matches!(err, UploadError::Cancelled));
        assert_eq!(snapshots.borrow().status, SessionStatus::Aborted);
    }
}
