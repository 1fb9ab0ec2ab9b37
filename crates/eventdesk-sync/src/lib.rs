//! Real-time attendee synchronization for eventdesk.
//!
//! Keeps an in-memory, ordered, duplicate-free record collection for one
//! event consistent with the backend while two sources race to update it:
//!
//! - **Snapshot**: an authoritative bulk read ([`SnapshotSource`])
//! - **Change feed**: live insert/update/delete notifications ([`ChangeFeed`])
//!
//! The [`ReconcilingStore`] merges both; the [`SyncActor`] binds a store to
//! one event at a time and publishes a [`StoreView`] after every change.
//!
//! ## Sync flow
//!
//! 1. `activate(Some(event))` resets the store and subscribes to the feed
//! 2. A snapshot read is issued; feed events arriving meanwhile are journaled
//! 3. The snapshot replaces the baseline and the journal is replayed on top
//! 4. Feed events are applied directly from then on
//! 5. After a feed disconnect, the resubscribe triggers another snapshot read

mod attendee;
pub mod collection;
mod error;
pub mod feed;
pub mod lifecycle;
mod record;
pub mod snapshot;
pub mod store;

pub use attendee::Attendee;
pub use collection::{ChangeOutcome, SortedCollection};
pub use error::SyncError;
pub use feed::{ChangeFeed, FeedSink, FeedSubscription, FeedTopic, RealtimeFeed};
pub use lifecycle::{SyncActor, SyncConfig, SyncHandle};
pub use record::{EventId, FeedEvent, FeedMessage, FeedStatus, Record};
pub use snapshot::{RestSnapshotFetcher, SnapshotSource};
pub use store::{FetchTicket, MAX_JOURNAL_EVENTS, ReconcilingStore, StoreView, SyncPhase};

use std::sync::Arc;

use eventdesk_backend::Backend;

/// Spawn an attendee sync actor wired to the shared backend.
pub fn attendee_sync(backend: &Backend, config: SyncConfig) -> SyncHandle<Attendee> {
    let snapshots = Arc::new(RestSnapshotFetcher::<Attendee>::new(backend.rest().clone()));
    let feed = Arc::new(RealtimeFeed::<Attendee>::new(Arc::clone(backend.realtime())));
    SyncHandle::spawn(snapshots, feed, config)
}
