//! Identity rows and session notifications.

use chrono::{DateTime, Utc};
use eventdesk_backend::Session;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Staff profile linked to an auth user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub organization_id: Option<Uuid>,
    #[serde(default)]
    pub last_active_at: Option<DateTime<Utc>>,
}

/// Organization a profile belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub slug: Option<String>,
}

/// Role and active flag read fresh for every gated request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub role: String,
    #[serde(rename = "is_active")]
    pub active: bool,
}

/// Identity-change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    SignedIn(Session),
    TokenRefreshed(Session),
    SignedOut,
}
