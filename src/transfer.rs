use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::client::UploadClient;
use crate::error::Result;
use crate::rest_types::CompletedPart;
use crate::retry::{RetryConfig, RetryPolicy};

/// Sends part payloads, retrying transient failures. It never touches
/// session state; the caller records the returned part.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    client: Arc<UploadClient>,
    retry: RetryPolicy,
}

impl TransferEngine {
    pub fn new(client: Arc<UploadClient>, retry: RetryConfig) -> Self {
        Self {
            client,
            retry: RetryPolicy::new(retry),
        }
    }

    pub fn client(&self) -> &Arc<UploadClient> {
        &self.client
    }

    /// Uploads one part. Bytes handed to the transport are reported on
    /// `progress_tx`, including those of attempts that end up retried.
    pub async fn submit_part(
        &self,
        upload_id: &str,
        part_number: u32,
        filename: &str,
        data: Bytes,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<CompletedPart> {
        let size = data.len();

        let result = self
            .retry
            .execute(|attempt| {
                if attempt > 0 {
                    debug!(upload_id, part_number, attempt, "Resending part");
                }
                self.client.upload_part(
                    upload_id,
                    part_number,
                    filename,
                    data.clone(),
                    progress_tx.clone(),
                )
            })
            .await;

        match &result {
            Ok(part) => debug!(upload_id, part_number, size, etag = %part.e_tag, "Part stored"),
            Err(e) => warn!(upload_id, part_number, error = %e, "Part upload failed"),
        }

        result
    }
}
