//! Snapshot reads.

use std::marker::PhantomData;

use async_trait::async_trait;
use eventdesk_backend::RestClient;
use tracing::{debug, warn};

use crate::{EventId, Record, SyncError};

/// Authoritative bulk read of every record of one parent.
#[async_trait]
pub trait SnapshotSource<R: Record>: Send + Sync {
    /// Fetch the current record set of `parent`, ordered by sort key.
    async fn fetch_records(&self, parent: EventId) -> Result<Vec<R>, SyncError>;
}

/// Snapshot source reading rows over the backend REST API.
pub struct RestSnapshotFetcher<R> {
    rest: RestClient,
    bearer: Option<String>,
    _record: PhantomData<fn() -> R>,
}

impl<R> Clone for RestSnapshotFetcher<R> {
    fn clone(&self) -> Self {
        Self {
            rest: self.rest.clone(),
            bearer: self.bearer.clone(),
            _record: PhantomData,
        }
    }
}

impl<R: Record> RestSnapshotFetcher<R> {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            bearer: None,
            _record: PhantomData,
        }
    }

    /// Read as a signed-in user instead of with the anonymous key.
    pub fn with_bearer(mut self, token: impl Into<String>) -> Self {
        self.bearer = Some(token.into());
        self
    }

    fn query(parent: EventId) -> Vec<(&'static str, String)> {
        vec![
            ("select", "*".to_string()),
            (R::PARENT_COLUMN, format!("eq.{}", parent)),
            ("order", R::ORDER.to_string()),
        ]
    }
}

/// Validate untyped rows into records. Rows that fail to decode or belong
/// to another parent are logged and skipped.
pub fn decode_rows<R: Record>(parent: EventId, rows: Vec<serde_json::Value>) -> Vec<R> {
    let total = rows.len();
    let records: Vec<R> = rows
        .into_iter()
        .enumerate()
        .filter_map(|(index, row)| match serde_json::from_value::<R>(row) {
            Ok(record) if record.parent_id() == parent => Some(record),
            Ok(record) => {
                warn!(index, id = ?record.id(), table = R::TABLE, "row belongs to another parent");
                None
            }
            Err(e) => {
                warn!(index, table = R::TABLE, error = %e, "skipping malformed row");
                None
            }
        })
        .collect();

    if records.len() != total {
        debug!(table = R::TABLE, kept = records.len(), total, "dropped invalid snapshot rows");
    }
    records
}

#[async_trait]
impl<R: Record> SnapshotSource<R> for RestSnapshotFetcher<R> {
    #[tracing::instrument(skip(self), fields(table = R::TABLE))]
    async fn fetch_records(&self, parent: EventId) -> Result<Vec<R>, SyncError> {
        let rows = self
            .rest
            .select_rows(R::TABLE, &Self::query(parent), self.bearer.as_deref())
            .await?;
        Ok(decode_rows(parent, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Attendee;
    use eventdesk_backend::{BackendConfig, BackendError};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use uuid::Uuid;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fetcher(server: &MockServer) -> RestSnapshotFetcher<Attendee> {
        let rest = RestClient::new(&BackendConfig::new(server.uri(), "anon-key")).unwrap();
        RestSnapshotFetcher::new(rest)
    }

    fn row(id: u128, event: u128, last: &str) -> serde_json::Value {
        json!({
            "id": Uuid::from_u128(id),
            "event_id": Uuid::from_u128(event),
            "first_name": "A",
            "last_name": last,
        })
    }

    #[tokio::test]
    async fn test_fetch_records_filters_by_parent_and_orders() {
        let mock_server = MockServer::start().await;
        let event = Uuid::from_u128(100);

        Mock::given(method("GET"))
            .and(path("/rest/v1/attendees"))
            .and(query_param("event_id", format!("eq.{}", event)))
            .and(query_param("order", "last_name.asc,first_name.asc"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([row(1, 100, "Ann"), row(2, 100, "Bo")])),
            )
            .mount(&mock_server)
            .await;

        let records = fetcher(&mock_server).fetch_records(event).await.unwrap();

        let names: Vec<_> = records.iter().map(|a| a.last_name.as_str()).collect();
        assert_eq!(names, vec!["Ann", "Bo"]);
    }

    #[tokio::test]
    async fn test_malformed_and_foreign_rows_skipped() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/attendees"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                row(1, 100, "Ann"),
                {"id": "not-a-uuid", "event_id": Uuid::from_u128(100)},
                row(3, 555, "Other"),
            ])))
            .mount(&mock_server)
            .await;

        let records = fetcher(&mock_server)
            .fetch_records(Uuid::from_u128(100))
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Uuid::from_u128(1));
    }

    #[tokio::test]
    async fn test_server_error_is_fetch_failure() {
        let mock_server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/attendees"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&mock_server)
            .await;

        let err = fetcher(&mock_server)
            .fetch_records(Uuid::from_u128(100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::Fetch(BackendError::Status { status: 503, .. })
        ));
    }
}
