//! Wire types shared by every backend consumer.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The authenticated user as reported by the auth service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Session tokens returned by sign-in and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix timestamp (seconds) at which `access_token` expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

impl Session {
    /// Whether the access token has expired at `now` (unix seconds).
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_deserialize() {
        let json = r#"{
            "access_token": "at",
            "refresh_token": "rt",
            "expires_at": 1700000000,
            "token_type": "bearer",
            "user": {"id": "00000000-0000-0000-0000-000000000007", "email": "a@b.co"}
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.user.id, Uuid::from_u128(7));
        assert!(session.is_expired_at(1700000000));
        assert!(!session.is_expired_at(1699999999));
    }

    #[test]
    fn test_session_without_expiry_never_expires() {
        let session = Session {
            access_token: "at".to_string(),
            refresh_token: "rt".to_string(),
            expires_at: None,
            user: AuthUser {
                id: Uuid::nil(),
                email: None,
            },
        };
        assert!(!session.is_expired_at(i64::MAX));
    }
}
