//! Identity context.
//!
//! Keeps an observer-facing [`IdentitySnapshot`] of the signed-in user in
//! sync with identity-change notifications. Resolution reads the profile,
//! then the organization it references, and records last activity on the
//! side. Every resolution remembers the sign-out epoch it started under and
//! only publishes if no sign-out happened since; the epoch check and the
//! publish run under the watch channel's lock, as does the sign-out clear.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use eventdesk_backend::{AuthUser, Session};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{IdentityProvider, Organization, Profile, SessionChange, SessionError};

/// What the application currently knows about its user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySnapshot {
    pub user: Option<AuthUser>,
    pub profile: Option<Profile>,
    pub organization: Option<Organization>,
    pub session: Option<Session>,
    /// True until the first resolution completes.
    pub loading: bool,
    /// Why the last resolution fell back to unauthenticated.
    pub last_error: Option<String>,
}

impl IdentitySnapshot {
    fn loading() -> Self {
        Self {
            loading: true,
            ..Self::signed_out()
        }
    }

    fn signed_out() -> Self {
        Self {
            user: None,
            profile: None,
            organization: None,
            session: None,
            loading: false,
            last_error: None,
        }
    }

    fn failed(error: &SessionError) -> Self {
        Self {
            last_error: Some(error.to_string()),
            ..Self::signed_out()
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Active profile with the `admin` role.
    pub fn is_admin(&self) -> bool {
        self.profile
            .as_ref()
            .is_some_and(|p| p.is_active && p.role == "admin")
    }
}

/// Process-wide identity state with change notifications.
pub struct IdentityContext {
    provider: Arc<dyn IdentityProvider>,
    snapshot_tx: watch::Sender<Arc<IdentitySnapshot>>,
    sign_out_epoch: AtomicU64,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl IdentityContext {
    /// Create the context, resolve the current session once and keep
    /// following identity changes until [`IdentityContext::shutdown`].
    pub fn start(provider: Arc<dyn IdentityProvider>) -> Arc<Self> {
        let (snapshot_tx, _) = watch::channel(Arc::new(IdentitySnapshot::loading()));
        let context = Arc::new(Self {
            provider,
            snapshot_tx,
            sign_out_epoch: AtomicU64::new(0),
            listener: Mutex::new(None),
        });

        // Subscribe before the first resolution so no change is missed.
        let changes = context.provider.session_changes();
        let task = tokio::spawn(Arc::clone(&context).listen(changes));
        if let Ok(mut listener) = context.listener.lock() {
            *listener = Some(task);
        }
        context
    }

    async fn listen(self: Arc<Self>, mut changes: broadcast::Receiver<SessionChange>) {
        self.resolve_current().await;

        loop {
            match changes.recv().await {
                Ok(SessionChange::SignedOut) => {
                    debug!("identity change: signed out");
                    self.resolve(None).await;
                }
                Ok(change) => {
                    debug!(?change, "identity change");
                    self.resolve_current().await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "identity changes lagged, resolving current session");
                    self.resolve_current().await;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("identity change stream closed");
                    return;
                }
            }
        }
    }

    /// Latest snapshot.
    pub fn snapshot(&self) -> Arc<IdentitySnapshot> {
        Arc::clone(&self.snapshot_tx.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<IdentitySnapshot>> {
        self.snapshot_tx.subscribe()
    }

    pub fn loading(&self) -> bool {
        self.snapshot_tx.borrow().loading
    }

    pub fn is_admin(&self) -> bool {
        self.snapshot_tx.borrow().is_admin()
    }

    /// Re-read profile and organization for the current session.
    pub async fn refresh_profile(&self) {
        self.resolve_current().await;
    }

    /// Sign out. When this returns the snapshot is cleared, and resolutions
    /// that started before the call can no longer publish.
    pub async fn sign_out(&self) {
        if let Err(e) = self.provider.sign_out().await {
            warn!(error = %e, "remote sign-out failed, clearing local identity anyway");
        }

        self.snapshot_tx.send_modify(|snapshot| {
            self.sign_out_epoch.fetch_add(1, Ordering::SeqCst);
            *snapshot = Arc::new(IdentitySnapshot::signed_out());
        });
        info!("identity cleared");
    }

    /// Stop following identity changes.
    pub fn shutdown(&self) {
        if let Ok(mut listener) = self.listener.lock() {
            if let Some(task) = listener.take() {
                task.abort();
            }
        }
    }

    async fn resolve_current(&self) {
        let epoch = self.sign_out_epoch.load(Ordering::SeqCst);
        let snapshot = match self.provider.current_session().await {
            Ok(session) => self.build(session).await,
            Err(e) => {
                warn!(error = %e, "failed to read current session");
                IdentitySnapshot::failed(&e)
            }
        };
        self.publish(epoch, snapshot);
    }

    async fn resolve(&self, session: Option<Session>) {
        let epoch = self.sign_out_epoch.load(Ordering::SeqCst);
        let snapshot = self.build(session).await;
        self.publish(epoch, snapshot);
    }

    async fn build(&self, session: Option<Session>) -> IdentitySnapshot {
        let Some(session) = session else {
            return IdentitySnapshot::signed_out();
        };
        match self.load_identity(&session.user).await {
            Ok((profile, organization)) => {
                if let Err(e) = self.provider.touch_last_active(session.user.id).await {
                    warn!(user = %session.user.id, error = %e, "failed to record last activity");
                }
                IdentitySnapshot {
                    user: Some(session.user.clone()),
                    profile,
                    organization,
                    session: Some(session),
                    loading: false,
                    last_error: None,
                }
            }
            Err(e) => {
                warn!(user = %session.user.id, error = %e, "identity resolution failed");
                IdentitySnapshot::failed(&e)
            }
        }
    }

    async fn load_identity(
        &self,
        user: &AuthUser,
    ) -> Result<(Option<Profile>, Option<Organization>), SessionError> {
        let profile = self.provider.profile(user.id).await?;
        let organization = match profile.as_ref().and_then(|p| p.organization_id) {
            Some(org_id) => self.provider.organization(org_id).await?,
            None => None,
        };
        Ok((profile, organization))
    }

    /// Publish unless a sign-out happened after `epoch` was read.
    fn publish(&self, epoch: u64, snapshot: IdentitySnapshot) {
        let published = self.snapshot_tx.send_if_modified(|current| {
            if self.sign_out_epoch.load(Ordering::SeqCst) != epoch {
                return false;
            }
            *current = Arc::new(snapshot);
            true
        });
        if !published {
            debug!(epoch, "discarding identity resolution from before sign-out");
        }
    }
}
