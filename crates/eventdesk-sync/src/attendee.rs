//! Attendee rows.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{EventId, Record};

/// An attendee of one event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    pub id: Uuid,
    pub event_id: EventId,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub job_title: Option<String>,
    #[serde(default)]
    pub checked_in: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl Attendee {
    /// Display name, "First Last".
    pub fn full_name(&self) -> String {
        match (self.first_name.is_empty(), self.last_name.is_empty()) {
            (true, _) => self.last_name.clone(),
            (_, true) => self.first_name.clone(),
            _ => format!("{} {}", self.first_name, self.last_name),
        }
    }
}

impl Record for Attendee {
    type Id = Uuid;

    const TABLE: &'static str = "attendees";
    const PARENT_COLUMN: &'static str = "event_id";
    const ORDER: &'static str = "last_name.asc,first_name.asc";

    fn id(&self) -> Uuid {
        self.id
    }

    fn parent_id(&self) -> EventId {
        self.event_id
    }

    fn cmp_sort_key(&self, other: &Self) -> Ordering {
        self.last_name
            .cmp(&other.last_name)
            .then_with(|| self.first_name.cmp(&other.first_name))
    }
}
