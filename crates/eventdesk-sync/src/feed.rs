//! Change-feed client.
//!
//! A [`ChangeFeed`] delivers typed [`FeedMessage`]s for one parent's rows to a
//! sink until the returned [`FeedSubscription`] is dropped. The realtime
//! implementation validates every frame into the record type at this
//! boundary; frames that do not decode are logged and dropped.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use eventdesk_backend::{
    ChangeFrame, ChangeKind, JoinRequest, RealtimeTransport, TopicEvent, TopicHandler, TopicStatus,
};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{EventId, FeedEvent, FeedMessage, FeedStatus, Record, SyncError};

/// Receiver of feed messages. Called on the transport task; must not block.
pub type FeedSink<R> = Arc<dyn Fn(FeedMessage<R>) + Send + Sync>;

/// Topic scoping a feed to one parent's rows of one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedTopic {
    pub name: String,
    pub table: &'static str,
    pub filter: String,
}

impl FeedTopic {
    pub fn for_parent<R: Record>(parent: EventId) -> Self {
        Self {
            name: format!("{}:{}", R::TABLE, parent),
            table: R::TABLE,
            filter: format!("{}=eq.{}", R::PARENT_COLUMN, parent),
        }
    }
}

/// Live feed registration. Dropping it (or calling
/// [`FeedSubscription::unsubscribe`]) stops delivery before returning.
pub struct FeedSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl FeedSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        self.cancel();
    }

    fn cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Source of change notifications for one record type.
pub trait ChangeFeed<R: Record>: Send + Sync {
    /// Start delivering messages for `topic` to `sink`.
    fn subscribe(&self, topic: FeedTopic, sink: FeedSink<R>) -> Result<FeedSubscription, SyncError>;
}

/// Change feed backed by the shared realtime websocket.
pub struct RealtimeFeed<R> {
    transport: Arc<RealtimeTransport>,
    _record: PhantomData<fn() -> R>,
}

impl<R> RealtimeFeed<R> {
    pub fn new(transport: Arc<RealtimeTransport>) -> Self {
        Self {
            transport,
            _record: PhantomData,
        }
    }
}

impl<R> Clone for RealtimeFeed<R> {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.transport))
    }
}

#[derive(Deserialize)]
struct KeyOnly<K> {
    id: K,
}

fn decode_row<R: Record>(row: Option<serde_json::Value>, what: &str) -> Result<R, SyncError> {
    let row = row.ok_or_else(|| SyncError::Malformed(format!("{} frame without record", what)))?;
    serde_json::from_value(row).map_err(|e| SyncError::Malformed(format!("{}: {}", what, e)))
}

/// Validate one change frame into a typed feed event.
pub fn decode_change<R: Record>(frame: ChangeFrame) -> Result<FeedEvent<R>, SyncError> {
    match frame.kind {
        ChangeKind::Insert => decode_row(frame.record, "insert").map(FeedEvent::Inserted),
        ChangeKind::Update => decode_row(frame.record, "update").map(FeedEvent::Updated),
        ChangeKind::Delete => {
            let old = frame
                .old_record
                .ok_or_else(|| SyncError::Malformed("delete frame without old record".into()))?;
            let key: KeyOnly<R::Id> = serde_json::from_value(old)
                .map_err(|e| SyncError::Malformed(format!("delete: {}", e)))?;
            Ok(FeedEvent::Deleted(key.id))
        }
    }
}

fn map_status(status: TopicStatus) -> FeedStatus {
    match status {
        TopicStatus::Joining => FeedStatus::Subscribing,
        TopicStatus::Joined => FeedStatus::Subscribed,
        TopicStatus::Disconnected => FeedStatus::Disconnected,
        TopicStatus::Rejected(reason) => FeedStatus::Failed(reason),
    }
}

impl<R: Record> ChangeFeed<R> for RealtimeFeed<R> {
    fn subscribe(&self, topic: FeedTopic, sink: FeedSink<R>) -> Result<FeedSubscription, SyncError> {
        let name = topic.name.clone();
        let handler_topic = name.clone();
        let handler: TopicHandler = Arc::new(move |event| match event {
            TopicEvent::Change(frame) => match decode_change::<R>(frame) {
                Ok(event) => sink(FeedMessage::Event(event)),
                Err(e) => warn!(topic = %handler_topic, error = %e, "dropping malformed change"),
            },
            TopicEvent::Status(status) => sink(FeedMessage::Status(map_status(status))),
        });

        let guard = self.transport.subscribe(
            JoinRequest {
                topic: topic.name,
                table: topic.table.to_string(),
                filter: Some(topic.filter),
            },
            handler,
        );
        debug!(topic = %name, "feed subscribed");

        Ok(FeedSubscription::new(move || {
            guard.unsubscribe();
            debug!(topic = %name, "feed unsubscribed");
        }))
    }
}
