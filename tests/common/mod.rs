//! Shared fixtures for the upload integration tests.
//!
//! The mock server speaks the upload protocol: an initiate call issuing
//! `UPLOAD_ID`, a part endpoint acknowledging whatever part number is in its
//! path, and a completion call returning `LOCATION`.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chunkup::{RetryConfig, UploadClient};
use serde_json::{Value, json};
use url::Url;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

pub const UPLOAD_ID: &str = "up-1";
pub const LOCATION: &str = "https://cdn.example.com/files/video.mp4";

pub async fn setup_mock_server() -> MockServer {
    MockServer::start().await
}

pub fn client(server: &MockServer) -> Arc<UploadClient> {
    Arc::new(UploadClient::new(Url::parse(&server.uri()).unwrap()))
}

/// Retries with no real waiting so failure paths finish quickly.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::new(max_retries)
        .with_initial_backoff(Duration::from_millis(1))
        .with_max_backoff(Duration::from_millis(5))
        .with_jitter(false)
}

pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn part_path(part_number: u32) -> String {
    format!("/upload/part/{}/{}", UPLOAD_ID, part_number)
}

pub fn complete_path() -> String {
    format!("/upload/complete/{}", UPLOAD_ID)
}

pub fn error_response(status: u16, message: &str) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_json(json!({ "message": message }))
}

/// Acknowledges a part with the number taken from the request path.
pub struct AckPart {
    pub delay: fn(u32) -> Duration,
}

impl Default for AckPart {
    fn default() -> Self {
        Self {
            delay: |_| Duration::ZERO,
        }
    }
}

pub fn part_number_of(request: &Request) -> u32 {
    request
        .url
        .path_segments()
        .and_then(|segments| segments.last())
        .and_then(|segment| segment.parse().ok())
        .unwrap()
}

impl Respond for AckPart {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let part_number = part_number_of(request);
        ResponseTemplate::new(200)
            .set_body_json(json!({
                "part": { "PartNumber": part_number, "ETag": format!("etag-{}", part_number) }
            }))
            .set_delay((self.delay)(part_number))
    }
}

pub async fn mount_initiate(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/upload/initiate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "uploadId": UPLOAD_ID })))
        .mount(server)
        .await;
}

pub async fn mount_parts(server: &MockServer, responder: AckPart) {
    Mock::given(method("POST"))
        .and(path_regex(format!(r"^/upload/part/{}/\d+$", UPLOAD_ID)))
        .respond_with(responder)
        .mount(server)
        .await;
}

pub async fn mount_complete(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(complete_path()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "location": LOCATION })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

/// Initiate, acknowledge every part, complete once.
pub async fn mount_happy_path(server: &MockServer) {
    mount_initiate(server).await;
    mount_parts(server, AckPart::default()).await;
    mount_complete(server, 1).await;
}

pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|request| request.url.path() == request_path)
        .collect()
}

/// Part numbers in the order the server received them.
pub async fn received_part_numbers(server: &MockServer) -> Vec<u32> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|request| request.url.path().starts_with("/upload/part/"))
        .map(part_number_of)
        .collect()
}

pub async fn completion_body(server: &MockServer) -> Value {
    let requests = requests_to(server, &complete_path()).await;
    assert_eq!(requests.len(), 1, "expected exactly one completion call");
    requests[0].body_json().unwrap()
}
