use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use crate::error::{Result, UploadError};
use crate::rest_types::{
    CompleteUploadRequest, CompletedPart, InitiateUploadRequest, InitiateUploadResponse,
    UploadPartResponse, UploadResult,
};

const UPLOAD_SEGMENT: &str = "upload";
const INITIATE_SEGMENT: &str = "initiate";
const PART_SEGMENT: &str = "part";
const COMPLETE_SEGMENT: &str = "complete";
const ABORT_SEGMENT: &str = "abort";

/// Size of the slices a part body is streamed in; each one is reported as sent.
const SUB_CHUNK_SIZE: usize = 64 * 1024;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_PART_TIMEOUT: Duration = Duration::from_secs(300);

/// Thin wrapper over the upload server's HTTP endpoints. Every call is a
/// single attempt; retrying is left to the caller.
#[derive(Debug, Clone)]
pub struct UploadClient {
    client: Client,
    base_url: Url,
    request_timeout: Duration,
    part_timeout: Duration,
}

impl UploadClient {
    pub fn new(base_url: Url) -> Self {
        Self::with_http_client(Client::new(), base_url)
    }

    pub fn with_http_client(client: Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            part_timeout: DEFAULT_PART_TIMEOUT,
        }
    }

    /// Timeout for the initiate, complete and abort calls.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Timeout for a single part attempt.
    pub fn with_part_timeout(mut self, timeout: Duration) -> Self {
        self.part_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                UploadError::validation(format!("{} cannot be used as a base URL", self.base_url))
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn initiate(&self, filename: &str, mime_type: &str) -> Result<String> {
        let url = self.endpoint(&[UPLOAD_SEGMENT, INITIATE_SEGMENT])?;

        let request = InitiateUploadRequest {
            filename: filename.to_string(),
            mimetype: mime_type.to_string(),
        };

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        let response: InitiateUploadResponse = parse_json(response).await?;
        if response.upload_id.is_empty() {
            return Err(UploadError::protocol("server returned an empty upload id"));
        }

        debug!(upload_id = %response.upload_id, filename, "Upload session initiated");
        Ok(response.upload_id)
    }

    pub async fn upload_part(
        &self,
        upload_id: &str,
        part_number: u32,
        filename: &str,
        data: Bytes,
        progress_tx: Option<mpsc::Sender<u64>>,
    ) -> Result<CompletedPart> {
        let part_number_segment = part_number.to_string();
        let url = self.endpoint(&[UPLOAD_SEGMENT, PART_SEGMENT, upload_id, &part_number_segment])?;

        let length = data.len() as u64;
        let chunks: Vec<Bytes> = (0..data.len())
            .step_by(SUB_CHUNK_SIZE)
            .map(|offset| data.slice(offset..(offset + SUB_CHUNK_SIZE).min(data.len())))
            .collect();

        let stream = futures::stream::iter(chunks).map(move |chunk| {
            if let Some(tx) = &progress_tx {
                let _ = tx.try_send(chunk.len() as u64);
            }
            Ok::<_, std::io::Error>(chunk)
        });

        let file_part =
            reqwest::multipart::Part::stream_with_length(reqwest::Body::wrap_stream(stream), length)
                .file_name(filename.to_string())
                .mime_str("application/octet-stream")?;

        let form = reqwest::multipart::Form::new()
            .text("filename", filename.to_string())
            .part("file", file_part);

        let response = self
            .client
            .post(url)
            .timeout(self.part_timeout)
            .multipart(form)
            .send()
            .await?;

        let response: UploadPartResponse = parse_json(response).await?;
        let part = response.part;

        if part.part_number != part_number {
            return Err(UploadError::protocol(format!(
                "server acknowledged part {} while part {} was sent",
                part.part_number, part_number
            )));
        }
        if part.e_tag.is_empty() {
            return Err(UploadError::protocol(format!(
                "server returned an empty ETag for part {}",
                part_number
            )));
        }

        Ok(part)
    }

    pub async fn complete(
        &self,
        upload_id: &str,
        filename: &str,
        parts: &[CompletedPart],
    ) -> Result<UploadResult> {
        let url = self.endpoint(&[UPLOAD_SEGMENT, COMPLETE_SEGMENT, upload_id])?;

        let request = CompleteUploadRequest { filename, parts };

        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;

        parse_json(response).await
    }

    pub async fn abort(&self, upload_id: &str) -> Result<()> {
        let url = self.endpoint(&[UPLOAD_SEGMENT, ABORT_SEGMENT, upload_id])?;

        let response = self
            .client
            .delete(url)
            .timeout(self.request_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UploadError::from_response(response).await);
        }
        Ok(())
    }
}

async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T> {
    if !response.status().is_success() {
        return Err(UploadError::from_response(response).await);
    }

    let body = response.bytes().await?;
    serde_json::from_slice(&body)
        .map_err(|e| UploadError::protocol(format!("malformed response body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_appends_segments() {
        let client = UploadClient::new(Url::parse("http://localhost:3000").unwrap());
        assert_eq!(
            client.endpoint(&["upload", "part", "abc", "3"]).unwrap().as_str(),
            "http://localhost:3000/upload/part/abc/3"
        );
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let client = UploadClient::new(Url::parse("https://files.example.com/api/").unwrap());
        assert_eq!(
            client.endpoint(&["upload", "initiate"]).unwrap().as_str(),
            "https://files.example.com/api/upload/initiate"
        );
    }

    #[test]
    fn test_endpoint_escapes_upload_id() {
        let client = UploadClient::new(Url::parse("http://localhost:3000").unwrap());
        assert_eq!(
            client.endpoint(&["upload", "complete", "a/b c"]).unwrap().as_str(),
            "http://localhost:3000/upload/complete/a%2Fb%20c"
        );
    }

    #[test]
    fn test_endpoint_rejects_opaque_base() {
        let client = UploadClient::new(Url::parse("mailto:someone@example.com").unwrap());
        assert!(matches!(
            client.endpoint(&["upload"]),
            Err(UploadError::Validation(_))
        ));
    }
}
