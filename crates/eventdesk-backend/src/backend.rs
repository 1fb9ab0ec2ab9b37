//! Process-wide backend context.
//!
//! The realtime connection and the auth-refresh state behind it must not be
//! duplicated within a process, so every component obtains the context
//! through [`Backend::shared`].

use std::sync::{Arc, Mutex, OnceLock};

use tracing::{info, warn};

use crate::{BackendConfig, BackendError, RealtimeTransport, RestClient};

static SHARED: OnceLock<Backend> = OnceLock::new();
static INIT: Mutex<()> = Mutex::new(());

/// REST client plus realtime transport for one backend.
#[derive(Clone)]
pub struct Backend {
    config: BackendConfig,
    rest: RestClient,
    realtime: Arc<RealtimeTransport>,
}

impl Backend {
    /// Build a standalone context. Prefer [`Backend::shared`] outside tests.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(config: BackendConfig) -> Result<Self, BackendError> {
        let rest = RestClient::new(&config)?;
        let realtime = RealtimeTransport::spawn(config.realtime_endpoint());
        info!(url = %config.url, "backend context created");
        Ok(Self {
            config,
            rest,
            realtime,
        })
    }

    /// The process-wide context, created by the first caller.
    ///
    /// Later callers get the same instance; a config that differs from the
    /// one used at creation is ignored with a warning.
    pub fn shared(config: &BackendConfig) -> Result<Self, BackendError> {
        if let Some(existing) = SHARED.get() {
            return Ok(existing.reuse(config));
        }

        let _guard = INIT.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = SHARED.get() {
            return Ok(existing.reuse(config));
        }

        let backend = Self::connect(config.clone())?;
        let _ = SHARED.set(backend.clone());
        Ok(backend)
    }

    fn reuse(&self, requested: &BackendConfig) -> Self {
        if &self.config != requested {
            warn!(
                existing = %self.config.url,
                requested = %requested.url,
                "backend context already initialized with a different config"
            );
        }
        self.clone()
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn realtime(&self) -> &Arc<RealtimeTransport> {
        &self.realtime
    }
}
