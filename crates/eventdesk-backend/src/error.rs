//! Error types for the backend client.

use thiserror::Error;

/// Errors that can occur when talking to the hosted backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Authentication failed or the session is no longer valid.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success status returned by the backend.
    #[error("backend returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Row or frame did not have the expected shape.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Configuration could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// Whether the error is worth retrying (network blips, 5xx).
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Http(e) => e.is_timeout() || e.is_connect(),
            BackendError::Status { status, .. } => *status >= 500 || *status == 429,
            BackendError::WebSocket(_) => true,
            _ => false,
        }
    }
}
