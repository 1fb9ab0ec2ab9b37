//! Error types for session handling.

use eventdesk_backend::BackendError;
use thiserror::Error;

/// Errors from identity and authorization collaborators.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Profile or organization could not be read.
    #[error("identity resolution failed: {0}")]
    IdentityResolution(String),

    /// Role and active flag could not be read.
    #[error("authorization read failed: {0}")]
    Authorization(String),

    /// Operation needs a signed-in session.
    #[error("not signed in")]
    NoSession,

    #[error(transparent)]
    Backend(#[from] BackendError),
}
