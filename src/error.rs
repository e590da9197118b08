use reqwest::{Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;

pub type Result<T, E = UploadError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload parameters: {0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("request rejected ({status}): {message}")]
    Client { status: u16, message: String },

    #[error("unexpected response from server: {0}")]
    Protocol(String),

    #[error("upload cancelled")]
    Cancelled,

    #[error("failed to read source data: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl UploadError {
    pub fn validation(msg: impl Into<String>) -> Self {
        UploadError::Validation(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        UploadError::Protocol(msg.into())
    }

    /// Transient failures worth another attempt: connectivity, timeouts and 5xx.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Network(_) | UploadError::Server { .. })
    }

    /// The text shown to a person: the server's own message when it sent
    /// one, otherwise the full description.
    pub fn message(&self) -> String {
        match self {
            UploadError::Server { message, .. } | UploadError::Client { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            UploadError::Server { status, .. } | UploadError::Client { status, .. } => {
                Some(*status)
            }
            _ => None,
        }
    }

    /// Builds the error for a non-2xx status, preferring the server's
    /// `{"message": ...}` body over the raw text.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.is_empty())
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("unknown error")
                    .to_string()
            });

        if status.is_server_error() {
            UploadError::Server {
                status: status.as_u16(),
                message,
            }
        } else if status.is_client_error() {
            UploadError::Client {
                status: status.as_u16(),
                message,
            }
        } else {
            UploadError::Protocol(format!("unexpected status {}: {}", status, message))
        }
    }

    pub async fn from_response(response: Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Self::from_status(status, &body)
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UploadError::Network(format!("request timed out: {}", err))
        } else if err.is_decode() {
            UploadError::Protocol(err.to_string())
        } else if let Some(status) = err.status() {
            UploadError::from_status(status, "")
        } else {
            UploadError::Network(err.to_string())
        }
    }
}

impl From<url::ParseError> for UploadError {
    fn from(err: url::ParseError) -> Self {
        UploadError::Validation(format!("invalid endpoint URL: {}", err))
    }
}
