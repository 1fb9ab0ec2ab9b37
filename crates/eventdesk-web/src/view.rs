//! JSON shape of an attendee view.

use eventdesk_sync::{Attendee, FeedStatus, StoreView, SyncPhase};
use serde::Serialize;
use uuid::Uuid;

/// Attendee list as sent to clients, both as a response body and as an
/// SSE payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendeesBody {
    pub event_id: Option<Uuid>,
    pub phase: &'static str,
    pub loading: bool,
    pub feed: String,
    /// Clients should refetch; live changes may have been missed.
    pub resync_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub attendees: Vec<Attendee>,
}

impl From<&StoreView<Attendee>> for AttendeesBody {
    fn from(view: &StoreView<Attendee>) -> Self {
        Self {
            event_id: view.parent,
            phase: phase_name(view.phase),
            loading: view.loading,
            feed: feed_name(&view.feed_status),
            resync_needed: view.resync_needed,
            error: view.error.as_ref().map(|e| e.to_string()),
            attendees: view.records.clone(),
        }
    }
}

fn phase_name(phase: SyncPhase) -> &'static str {
    match phase {
        SyncPhase::Idle => "idle",
        SyncPhase::Loading => "loading",
        SyncPhase::Live => "live",
        SyncPhase::Error => "error",
    }
}

fn feed_name(status: &FeedStatus) -> String {
    match status {
        FeedStatus::Inactive => "inactive".to_string(),
        FeedStatus::Subscribing => "subscribing".to_string(),
        FeedStatus::Subscribed => "subscribed".to_string(),
        FeedStatus::Disconnected => "disconnected".to_string(),
        FeedStatus::Failed(reason) => format!("failed: {}", reason),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventdesk_sync::SyncError;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[test]
    fn test_body_from_failed_view() {
        let view = StoreView::<Attendee> {
            parent: Some(Uuid::from_u128(100)),
            phase: SyncPhase::Error,
            feed_status: FeedStatus::Failed("closed by server".to_string()),
            error: Some(Arc::new(SyncError::FeedConnection("refused".to_string()))),
            ..StoreView::default()
        };

        let body = AttendeesBody::from(&view);
        assert_eq!(body.phase, "error");
        assert_eq!(body.feed, "failed: closed by server");
        assert!(body.error.unwrap().contains("refused"));
    }

    #[test]
    fn test_idle_body_omits_error() {
        let body = AttendeesBody::from(&StoreView::<Attendee>::default());
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["phase"], "idle");
        assert!(json.get("error").is_none());
        assert_eq!(json["attendees"], serde_json::json!([]));
    }
}
