//! Error types for the web surface.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum WebError {
    /// Attendee sync failed.
    #[error("sync error: {0}")]
    Sync(#[from] eventdesk_sync::SyncError),

    /// The first snapshot did not settle in time.
    #[error("timed out waiting for attendees")]
    Timeout,
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            WebError::Sync(_) => StatusCode::BAD_GATEWAY,
        };
        tracing::warn!(error = %self, %status, "request failed");
        (status, self.to_string()).into_response()
    }
}
