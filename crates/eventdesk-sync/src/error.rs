//! Error types for attendee synchronization.

use eventdesk_backend::BackendError;
use thiserror::Error;

/// Errors surfaced by the sync subsystem.
///
/// Fetch and feed failures are reported through the store view rather than
/// returned from handle methods.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Snapshot read failed.
    #[error("snapshot fetch failed: {0}")]
    Fetch(#[from] BackendError),

    /// The change feed could not be joined or was dropped.
    #[error("change feed connection failed: {0}")]
    FeedConnection(String),

    /// A change or row did not decode into a record.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Operation needs an active event but none is bound.
    #[error("no event is active")]
    Inactive,

    /// The binding was torn down before the operation finished.
    #[error("sync was cancelled")]
    Cancelled,

    /// The sync actor has stopped.
    #[error("sync actor has stopped")]
    Closed,
}
