//! Identity, authorization and session-lookup collaborators.
//!
//! The traits are what the gate and the identity context consume; the
//! `Rest*` types implement them against the backend's auth service and
//! `profiles`/`organizations` tables.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use eventdesk_backend::{AuthUser, BackendError, RestClient, Session};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::{RwLock, broadcast};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{AccessGrant, Organization, Profile, SessionChange, SessionError};

/// Capacity of the session-change broadcast channel.
const SESSION_CHANNEL_SIZE: usize = 16;

/// Source of the signed-in session and the identity rows behind it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The current session, refreshed first if it has expired.
    async fn current_session(&self) -> Result<Option<Session>, SessionError>;

    /// Stream of identity-change notifications.
    fn session_changes(&self) -> broadcast::Receiver<SessionChange>;

    /// Invalidate the session locally and on the server.
    async fn sign_out(&self) -> Result<(), SessionError>;

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, SessionError>;

    async fn organization(&self, org_id: Uuid) -> Result<Option<Organization>, SessionError>;

    /// Record that the user was just active.
    async fn touch_last_active(&self, user_id: Uuid) -> Result<(), SessionError>;
}

/// Fresh read of a user's role and active flag.
#[async_trait]
pub trait AuthorizationSource: Send + Sync {
    async fn access_grant(&self, user_id: Uuid) -> Result<AccessGrant, SessionError>;
}

/// Resolve a request's access token to a user.
#[async_trait]
pub trait SessionLookup: Send + Sync {
    /// `Ok(None)` when the token is unknown or expired.
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, SessionError>;
}

async fn first_row<T: DeserializeOwned>(
    rest: &RestClient,
    table: &str,
    id: Uuid,
    select: &str,
    bearer: Option<&str>,
) -> Result<Option<T>, BackendError> {
    let query = [("id", format!("eq.{}", id)), ("select", select.to_string())];
    let rows = rest.select_rows(table, &query, bearer).await?;
    match rows.into_iter().next() {
        Some(row) => Ok(Some(serde_json::from_value(row)?)),
        None => Ok(None),
    }
}

/// Identity provider backed by the auth service.
pub struct RestIdentityProvider {
    rest: RestClient,
    session: Arc<RwLock<Option<Session>>>,
    changes: broadcast::Sender<SessionChange>,
}

impl RestIdentityProvider {
    pub fn new(rest: RestClient) -> Self {
        let (changes, _) = broadcast::channel(SESSION_CHANNEL_SIZE);
        Self {
            rest,
            session: Arc::new(RwLock::new(None)),
            changes,
        }
    }

    /// Adopt an existing session, e.g. one restored from a cookie.
    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(SessionChange::SignedIn(session));
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SessionError> {
        #[derive(Serialize)]
        struct PasswordGrant<'a> {
            email: &'a str,
            password: &'a str,
        }

        let session: Session = self
            .rest
            .auth_post(
                "/auth/v1/token",
                &[("grant_type", "password")],
                &PasswordGrant { email, password },
                None,
            )
            .await?;
        info!(user = %session.user.id, "signed in");

        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(SessionChange::SignedIn(session.clone()));
        Ok(session)
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh_session(&self) -> Result<Session, SessionError> {
        #[derive(Serialize)]
        struct RefreshGrant<'a> {
            refresh_token: &'a str,
        }

        let refresh_token = {
            let session = self.session.read().await;
            session
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .ok_or(SessionError::NoSession)?
        };

        let session: Session = self
            .rest
            .auth_post(
                "/auth/v1/token",
                &[("grant_type", "refresh_token")],
                &RefreshGrant {
                    refresh_token: &refresh_token,
                },
                None,
            )
            .await?;
        debug!(user = %session.user.id, "session refreshed");

        *self.session.write().await = Some(session.clone());
        let _ = self.changes.send(SessionChange::TokenRefreshed(session.clone()));
        Ok(session)
    }

    async fn bearer(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    async fn current_session(&self) -> Result<Option<Session>, SessionError> {
        let session = self.session.read().await.clone();
        match session {
            Some(s) if s.is_expired_at(Utc::now().timestamp()) => {
                debug!(user = %s.user.id, "session expired, refreshing");
                self.refresh_session().await.map(Some)
            }
            other => Ok(other),
        }
    }

    fn session_changes(&self) -> broadcast::Receiver<SessionChange> {
        self.changes.subscribe()
    }

    async fn sign_out(&self) -> Result<(), SessionError> {
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        let _ = self.changes.send(SessionChange::SignedOut);
        info!(user = %session.user.id, "signed out");

        self.rest
            .auth_post_empty("/auth/v1/logout", Some(&session.access_token))
            .await?;
        Ok(())
    }

    async fn profile(&self, user_id: Uuid) -> Result<Option<Profile>, SessionError> {
        let bearer = self.bearer().await;
        first_row(&self.rest, "profiles", user_id, "*", bearer.as_deref())
            .await
            .map_err(|e| SessionError::IdentityResolution(format!("profile {}: {}", user_id, e)))
    }

    async fn organization(&self, org_id: Uuid) -> Result<Option<Organization>, SessionError> {
        let bearer = self.bearer().await;
        first_row(&self.rest, "organizations", org_id, "*", bearer.as_deref())
            .await
            .map_err(|e| SessionError::IdentityResolution(format!("organization {}: {}", org_id, e)))
    }

    async fn touch_last_active(&self, user_id: Uuid) -> Result<(), SessionError> {
        let bearer = self.bearer().await;
        let body = serde_json::json!({ "last_active_at": Utc::now() });
        self.rest
            .update_rows(
                "profiles",
                &[("id", format!("eq.{}", user_id))],
                &body,
                bearer.as_deref(),
            )
            .await?;
        Ok(())
    }
}

/// Reads role and active flag from the `profiles` table.
#[derive(Clone)]
pub struct RestAuthorization {
    rest: RestClient,
}

impl RestAuthorization {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl AuthorizationSource for RestAuthorization {
    async fn access_grant(&self, user_id: Uuid) -> Result<AccessGrant, SessionError> {
        let grant: Option<AccessGrant> =
            first_row(&self.rest, "profiles", user_id, "role,is_active", None)
                .await
                .map_err(|e| SessionError::Authorization(e.to_string()))?;

        // No profile row means no role.
        Ok(grant.unwrap_or_else(|| {
            warn!(user = %user_id, "no profile row for user");
            AccessGrant {
                role: String::new(),
                active: false,
            }
        }))
    }
}

/// Validates access tokens against the auth service.
#[derive(Clone)]
pub struct RestSessionLookup {
    rest: RestClient,
}

impl RestSessionLookup {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl SessionLookup for RestSessionLookup {
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, SessionError> {
        match self.rest.auth_get::<AuthUser>("/auth/v1/user", Some(token)).await {
            Ok(user) => Ok(Some(user)),
            Err(BackendError::Auth(reason)) => {
                debug!(reason = %reason, "token rejected");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventdesk_backend::BackendConfig;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rest(server: &MockServer) -> RestClient {
        RestClient::new(&BackendConfig::new(server.uri(), "anon-key")).unwrap()
    }

    fn session_json(user: u128) -> serde_json::Value {
        json!({
            "access_token": "at-1",
            "refresh_token": "rt-1",
            "expires_at": null,
            "user": {"id": Uuid::from_u128(user), "email": "staff@example.com"},
        })
    }

    #[tokio::test]
    async fn test_sign_in_stores_session_and_notifies() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "password"))
            .and(body_json(json!({"email": "staff@example.com", "password": "pw"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json(7)))
            .mount(&mock_server)
            .await;

        let provider = RestIdentityProvider::new(rest(&mock_server));
        let mut changes = provider.session_changes();

        let session = provider
            .sign_in_with_password("staff@example.com", "pw")
            .await
            .unwrap();

        assert_eq!(session.user.id, Uuid::from_u128(7));
        assert_eq!(provider.current_session().await.unwrap(), Some(session.clone()));
        assert_eq!(changes.recv().await.unwrap(), SessionChange::SignedIn(session));
    }

    #[tokio::test]
    async fn test_bad_credentials_are_auth_errors() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .respond_with(ResponseTemplate::new(401).set_body_string("invalid login"))
            .mount(&mock_server)
            .await;

        let provider = RestIdentityProvider::new(rest(&mock_server));
        let err = provider.sign_in_with_password("a", "b").await.unwrap_err();

        assert!(matches!(err, SessionError::Backend(BackendError::Auth(_))));
        assert_eq!(provider.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_is_refreshed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/token"))
            .and(query_param("grant_type", "refresh_token"))
            .and(body_json(json!({"refresh_token": "old-rt"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(session_json(7)))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = RestIdentityProvider::new(rest(&mock_server));
        provider
            .set_session(Session {
                access_token: "old-at".to_string(),
                refresh_token: "old-rt".to_string(),
                expires_at: Some(1),
                user: AuthUser {
                    id: Uuid::from_u128(7),
                    email: None,
                },
            })
            .await;

        let session = provider.current_session().await.unwrap().unwrap();
        assert_eq!(session.access_token, "at-1");
    }

    #[tokio::test]
    async fn test_sign_out_clears_before_remote_call() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/auth/v1/logout"))
            .and(header("Authorization", "Bearer at-1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&mock_server)
            .await;

        let provider = RestIdentityProvider::new(rest(&mock_server));
        provider
            .set_session(serde_json::from_value(session_json(7)).unwrap())
            .await;

        // Remote revoke fails, local session is gone regardless.
        assert!(provider.sign_out().await.is_err());
        assert_eq!(provider.current_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_profile_and_organization_reads() {
        let mock_server = MockServer::start().await;
        let org = Uuid::from_u128(50);
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("id", format!("eq.{}", Uuid::from_u128(7))))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": Uuid::from_u128(7),
                "role": "admin",
                "is_active": true,
                "organization_id": org,
            }])))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/organizations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let provider = RestIdentityProvider::new(rest(&mock_server));
        let profile = provider.profile(Uuid::from_u128(7)).await.unwrap().unwrap();
        assert_eq!(profile.organization_id, Some(org));
        assert_eq!(provider.organization(org).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_access_grant_reads_role_and_flag() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("select", "role,is_active"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([{"role": "viewer", "is_active": true}])),
            )
            .mount(&mock_server)
            .await;

        let grant = RestAuthorization::new(rest(&mock_server))
            .access_grant(Uuid::from_u128(7))
            .await
            .unwrap();
        assert_eq!(
            grant,
            AccessGrant {
                role: "viewer".to_string(),
                active: true
            }
        );
    }

    #[tokio::test]
    async fn test_missing_profile_grants_nothing() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&mock_server)
            .await;

        let grant = RestAuthorization::new(rest(&mock_server))
            .access_grant(Uuid::from_u128(7))
            .await
            .unwrap();
        assert!(!grant.active);
    }

    #[tokio::test]
    async fn test_session_lookup_maps_rejection_to_none() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer good"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": Uuid::from_u128(7)})),
            )
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/auth/v1/user"))
            .and(header("Authorization", "Bearer bad"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&mock_server)
            .await;

        let lookup = RestSessionLookup::new(rest(&mock_server));
        let user = lookup.user_for_token("good").await.unwrap().unwrap();
        assert_eq!(user.id, Uuid::from_u128(7));
        assert_eq!(lookup.user_for_token("bad").await.unwrap(), None);
    }
}
