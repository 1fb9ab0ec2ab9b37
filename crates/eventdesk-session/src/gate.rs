//! Per-request session gate.
//!
//! The decision is computed fresh on every request: role and active flag
//! are re-read each time a signed-in user reaches a protected path, so a
//! deactivation takes effect on the very next request.

use std::sync::Arc;

use eventdesk_backend::AuthUser;
use reqwest::Url;
use tracing::{debug, warn};

use crate::{AccessGrant, AuthorizationSource, SessionLookup};

/// Path and role settings for the gate.
#[derive(Debug, Clone)]
pub struct GateConfig {
    pub login_path: String,
    /// Where signed-in users visiting the login page are sent.
    pub landing_path: String,
    pub unauthorized_path: String,
    /// Paths equal to or below these prefixes need no session.
    pub public_prefixes: Vec<String>,
    /// Roles allowed through protected paths.
    pub admin_roles: Vec<String>,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            login_path: "/login".to_string(),
            landing_path: "/dashboard".to_string(),
            unauthorized_path: "/unauthorized".to_string(),
            public_prefixes: ["/login", "/unauthorized", "/health", "/auth"]
                .into_iter()
                .map(String::from)
                .collect(),
            admin_roles: vec!["admin".to_string()],
        }
    }
}

/// Whether a path needs a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathClass {
    Public,
    Protected,
}

impl GateConfig {
    pub fn classify(&self, path: &str) -> PathClass {
        let public = self.public_prefixes.iter().any(|prefix| {
            path == prefix
                || path
                    .strip_prefix(prefix.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        });
        if public {
            PathClass::Public
        } else {
            PathClass::Protected
        }
    }

    /// Whether `grant` lets its holder through protected paths.
    pub fn permits(&self, grant: &AccessGrant) -> bool {
        grant.active && self.admin_roles.iter().any(|role| *role == grant.role)
    }
}

/// Outcome of gating one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    /// No session; come back to `return_to` after signing in.
    RedirectLogin { return_to: String },
    /// Already signed in and asking for the login page.
    RedirectLanding,
    /// Signed in without an active admin-equivalent role.
    RedirectUnauthorized,
}

impl Decision {
    /// Redirect target, or `None` for [`Decision::Allow`].
    pub fn location(&self, config: &GateConfig) -> Option<String> {
        match self {
            Decision::Allow => None,
            Decision::RedirectLogin { return_to } => Some(login_location(config, return_to)),
            Decision::RedirectLanding => Some(config.landing_path.clone()),
            Decision::RedirectUnauthorized => Some(config.unauthorized_path.clone()),
        }
    }
}

fn login_location(config: &GateConfig, return_to: &str) -> String {
    // Only the path and encoded query are kept; the base is a placeholder.
    match Url::parse("http://gate.invalid").and_then(|base| base.join(&config.login_path)) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("redirectTo", return_to);
            match url.query() {
                Some(query) => format!("{}?{}", url.path(), query),
                None => url.path().to_string(),
            }
        }
        Err(_) => config.login_path.clone(),
    }
}

/// Identity facts known about the caller of one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Caller<'a> {
    Anonymous,
    /// Signed in; `grant` is the freshly read role and flag, `None` if the
    /// read failed.
    SignedIn { grant: Option<&'a AccessGrant> },
}

/// Pure gating decision.
pub fn decide(config: &GateConfig, path: &str, caller: Caller<'_>) -> Decision {
    match (config.classify(path), caller) {
        (PathClass::Public, Caller::SignedIn { .. }) if path == config.login_path => {
            Decision::RedirectLanding
        }
        (PathClass::Public, _) => Decision::Allow,
        (PathClass::Protected, Caller::Anonymous) => Decision::RedirectLogin {
            return_to: path.to_string(),
        },
        (PathClass::Protected, Caller::SignedIn { grant: Some(grant) }) if config.permits(grant) => {
            Decision::Allow
        }
        (PathClass::Protected, Caller::SignedIn { .. }) => Decision::RedirectUnauthorized,
    }
}

/// Gate evaluating requests against live session and role state.
#[derive(Clone)]
pub struct SessionGate {
    config: Arc<GateConfig>,
    authorization: Arc<dyn AuthorizationSource>,
    sessions: Arc<dyn SessionLookup>,
}

impl SessionGate {
    pub fn new(
        config: GateConfig,
        authorization: Arc<dyn AuthorizationSource>,
        sessions: Arc<dyn SessionLookup>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            authorization,
            sessions,
        }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Gate a request carrying an optional access token.
    pub async fn evaluate(&self, path: &str, token: Option<&str>) -> Decision {
        let user = match token {
            Some(token) => match self.sessions.user_for_token(token).await {
                Ok(user) => user,
                Err(e) => {
                    warn!(path, error = %e, "session lookup failed, treating as anonymous");
                    None
                }
            },
            None => None,
        };
        self.evaluate_user(path, user.as_ref()).await
    }

    /// Gate a request for an already resolved user.
    pub async fn evaluate_user(&self, path: &str, user: Option<&AuthUser>) -> Decision {
        let decision = match user {
            None => decide(&self.config, path, Caller::Anonymous),
            Some(user) if self.config.classify(path) == PathClass::Protected => {
                let grant = match self.authorization.access_grant(user.id).await {
                    Ok(grant) => Some(grant),
                    Err(e) => {
                        warn!(user = %user.id, path, error = %e, "role read failed, denying");
                        None
                    }
                };
                decide(
                    &self.config,
                    path,
                    Caller::SignedIn {
                        grant: grant.as_ref(),
                    },
                )
            }
            Some(_) => decide(&self.config, path, Caller::SignedIn { grant: None }),
        };
        debug!(path, ?decision, "gate decision");
        decision
    }
}
