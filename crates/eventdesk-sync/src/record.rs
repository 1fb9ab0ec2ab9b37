//! Record abstraction and change-feed message types.

use std::cmp::Ordering;
use std::fmt::Debug;
use std::hash::Hash;

use serde::de::DeserializeOwned;
use uuid::Uuid;

/// Identifier of the parent entity (an event) that scopes a record set.
pub type EventId = Uuid;

/// A row type that can be kept in a reconciling store.
///
/// Implementors describe where their rows live and how they are ordered;
/// rows are validated into this type at the fetch and feed boundaries.
pub trait Record: Clone + Debug + Send + Sync + DeserializeOwned + 'static {
    /// Immutable identifier, unique within a parent.
    type Id: Clone + Debug + Eq + Ord + Hash + Send + Sync + DeserializeOwned + 'static;

    /// Backing table name.
    const TABLE: &'static str;
    /// Column holding the parent id.
    const PARENT_COLUMN: &'static str;
    /// Server-side ordering requested with snapshot reads.
    const ORDER: &'static str;

    fn id(&self) -> Self::Id;

    fn parent_id(&self) -> EventId;

    /// Compare by sort key only. Ties are broken by id in the collection.
    fn cmp_sort_key(&self, other: &Self) -> Ordering;
}

/// A single mutation delivered by the change feed.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent<R: Record> {
    Inserted(R),
    Updated(R),
    Deleted(R::Id),
}

impl<R: Record> FeedEvent<R> {
    /// Identifier the event targets.
    pub fn id(&self) -> R::Id {
        match self {
            FeedEvent::Inserted(r) | FeedEvent::Updated(r) => r.id(),
            FeedEvent::Deleted(id) => id.clone(),
        }
    }
}

/// Connection status of a feed subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FeedStatus {
    /// No subscription.
    #[default]
    Inactive,
    /// Join requested.
    Subscribing,
    /// Changes are flowing.
    Subscribed,
    /// The connection dropped; changes may be missed until resubscribed.
    Disconnected,
    /// The subscription could not be established.
    Failed(String),
}

/// Message delivered to a feed sink.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedMessage<R: Record> {
    Event(FeedEvent<R>),
    Status(FeedStatus),
}
