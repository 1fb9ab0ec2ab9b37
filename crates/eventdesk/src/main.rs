//! eventdesk: live attendee lists for event organizers.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use eventdesk_backend::{Backend, BackendConfig};
use eventdesk_session::{
    GateConfig, IdentityContext, RestAuthorization, RestIdentityProvider, RestSessionLookup,
    SessionGate,
};
use eventdesk_sync::{
    Attendee, RealtimeFeed, RestSnapshotFetcher, StoreView, SyncConfig, SyncHandle,
    attendee_sync,
};
use eventdesk_web::{AppState, AttendeeSyncFactory, create_router};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

/// Parse boolean from environment variable, accepting common truthy values.
/// Accepts "1", "true", "yes", "on" as true and "0", "false", "no", "off",
/// "" as false (case-insensitive).
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "eventdesk")]
#[command(about = "Live attendee lists for event organizers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Backend connection flags shared by every subcommand.
#[derive(clap::Args, Debug, Clone)]
struct BackendArgs {
    /// Backend base URL
    #[arg(long, env = "EVENTDESK_BACKEND_URL")]
    backend_url: String,

    /// Public API key
    #[arg(long, env = "EVENTDESK_API_KEY")]
    api_key: String,

    /// Realtime websocket endpoint (derived from the backend URL if unset)
    #[arg(long, env = "EVENTDESK_REALTIME_URL")]
    realtime_url: Option<String>,

    /// Refetch attendees after the change feed reconnects
    #[arg(long, env = "EVENTDESK_RESYNC_ON_RECONNECT", action = clap::ArgAction::Set, value_parser = parse_bool_env, default_value = "true")]
    resync_on_reconnect: bool,
}

impl BackendArgs {
    fn backend_config(&self) -> BackendConfig {
        let config = BackendConfig::new(&self.backend_url, &self.api_key);
        match &self.realtime_url {
            Some(url) if !url.is_empty() => config.with_realtime_url(url),
            _ => config,
        }
    }

    fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            resync_on_reconnect: self.resync_on_reconnect,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gated web server with live attendee streams
    Serve {
        #[command(flatten)]
        backend: BackendArgs,

        /// Port to listen on
        #[arg(long, default_value = "3847")]
        port: u16,

        /// Roles allowed into the organizer dashboard
        #[arg(long = "admin-role", env = "EVENTDESK_ADMIN_ROLES", value_delimiter = ',', default_value = "admin")]
        admin_roles: Vec<String>,
    },

    /// Follow one event's attendee list in the terminal
    Watch {
        #[command(flatten)]
        backend: BackendArgs,

        /// Event to follow
        #[arg(long)]
        event_id: Uuid,

        /// Organizer email; reads anonymously when unset
        #[arg(long, env = "EVENTDESK_EMAIL")]
        email: Option<String>,

        /// Organizer password
        #[arg(long, env = "EVENTDESK_PASSWORD", requires = "email")]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "eventdesk=info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            backend,
            port,
            admin_roles,
        } => run_server(&backend, port, admin_roles).await,
        Commands::Watch {
            backend,
            event_id,
            email,
            password,
        } => run_watch(&backend, event_id, email, password).await,
    }
}

async fn run_server(args: &BackendArgs, port: u16, admin_roles: Vec<String>) -> Result<()> {
    let backend = Backend::shared(&args.backend_config()).into_diagnostic()?;

    let gate = SessionGate::new(
        GateConfig {
            admin_roles,
            ..GateConfig::default()
        },
        Arc::new(RestAuthorization::new(backend.rest().clone())),
        Arc::new(RestSessionLookup::new(backend.rest().clone())),
    );

    let sync_config = args.sync_config();
    let sync_backend = backend.clone();
    let attendees: AttendeeSyncFactory =
        Arc::new(move || attendee_sync(&sync_backend, sync_config.clone()));

    let router = create_router(AppState::new(gate, attendees));

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .into_diagnostic()?;

    tracing::info!("web server listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()?;

    backend.realtime().shutdown();
    Ok(())
}

async fn run_watch(
    args: &BackendArgs,
    event_id: Uuid,
    email: Option<String>,
    password: Option<String>,
) -> Result<()> {
    let backend = Backend::shared(&args.backend_config()).into_diagnostic()?;
    let mut snapshots = RestSnapshotFetcher::<Attendee>::new(backend.rest().clone());

    let identity = match email {
        Some(email) => {
            let provider = Arc::new(RestIdentityProvider::new(backend.rest().clone()));
            let session = provider
                .sign_in_with_password(&email, password.as_deref().unwrap_or_default())
                .await
                .into_diagnostic()?;
            snapshots = snapshots.with_bearer(session.access_token);

            let identity = IdentityContext::start(provider);
            let mut changes = identity.subscribe();
            if let Ok(snapshot) = changes.wait_for(|s| !s.loading).await {
                match &snapshot.profile {
                    Some(profile) => tracing::info!(
                        role = %profile.role,
                        organization = ?snapshot.organization.as_ref().map(|o| &o.name),
                        "signed in"
                    ),
                    None => tracing::warn!(error = ?snapshot.last_error, "signed in without a profile"),
                }
            }
            Some(identity)
        }
        None => None,
    };

    let handle: SyncHandle<Attendee> = SyncHandle::spawn(
        Arc::new(snapshots),
        Arc::new(RealtimeFeed::<Attendee>::new(Arc::clone(backend.realtime()))),
        args.sync_config(),
    );
    handle.activate(Some(event_id)).await.into_diagnostic()?;

    let mut views = handle.subscribe();
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            changed = views.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = Arc::clone(&views.borrow_and_update());
                log_view(&view);
            }
        }
    }

    handle.deactivate().await.into_diagnostic()?;
    if let Some(identity) = identity {
        identity.sign_out().await;
        identity.shutdown();
    }
    backend.realtime().shutdown();
    Ok(())
}

fn log_view(view: &StoreView<Attendee>) {
    let checked_in = view.records.iter().filter(|a| a.checked_in).count();
    tracing::info!(
        event = ?view.parent,
        phase = ?view.phase,
        feed = ?view.feed_status,
        attendees = view.records.len(),
        checked_in,
        "attendees updated"
    );
    if let Some(error) = &view.error {
        tracing::warn!(%error, "attendee sync error");
    }
    if view.resync_needed {
        tracing::warn!("live changes may have been missed; waiting for resync");
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_bool_env() {
        assert_eq!(parse_bool_env("YES"), Ok(true));
        assert_eq!(parse_bool_env("off"), Ok(false));
        assert_eq!(parse_bool_env(""), Ok(false));
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_watch_args() {
        let cli = Cli::try_parse_from([
            "eventdesk",
            "watch",
            "--backend-url",
            "https://project.example.co",
            "--api-key",
            "anon",
            "--event-id",
            "00000000-0000-0000-0000-000000000064",
            "--resync-on-reconnect",
            "no",
        ])
        .unwrap();

        let Commands::Watch {
            backend, event_id, ..
        } = cli.command
        else {
            panic!("expected watch");
        };
        assert_eq!(event_id, Uuid::from_u128(100));
        assert!(!backend.sync_config().resync_on_reconnect);
        assert_eq!(
            backend.backend_config().realtime_endpoint(),
            BackendConfig::new("https://project.example.co", "anon").realtime_endpoint()
        );
    }

    #[test]
    fn test_serve_admin_roles_split() {
        let cli = Cli::try_parse_from([
            "eventdesk",
            "serve",
            "--backend-url",
            "http://localhost:54321",
            "--api-key",
            "anon",
            "--admin-role",
            "admin,owner",
        ])
        .unwrap();

        let Commands::Serve {
            port, admin_roles, ..
        } = cli.command
        else {
            panic!("expected serve");
        };
        assert_eq!(port, 3847);
        assert_eq!(admin_roles, vec!["admin".to_string(), "owner".to_string()]);
    }
}
