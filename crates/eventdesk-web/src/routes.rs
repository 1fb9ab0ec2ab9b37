//! HTTP routes and the session gate middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Request, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{Html, IntoResponse, Json, Redirect, Response};
use axum::routing::get;
use axum_extra::extract::cookie::CookieJar;
use eventdesk_session::SessionGate;
use eventdesk_sync::{Attendee, EventId, SyncHandle};
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::WebError;
use crate::sse::attendee_stream;
use crate::view::AttendeesBody;

/// Cookie carrying the backend access token.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// How long a one-shot attendee read waits for the first snapshot.
const DEFAULT_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

/// Creates one attendee sync binding per request or stream.
pub type AttendeeSyncFactory = Arc<dyn Fn() -> SyncHandle<Attendee> + Send + Sync>;

/// Shared state for all handlers.
pub struct AppState {
    gate: SessionGate,
    attendees: AttendeeSyncFactory,
    snapshot_timeout: Duration,
}

impl AppState {
    pub fn new(gate: SessionGate, attendees: AttendeeSyncFactory) -> Self {
        Self {
            gate,
            attendees,
            snapshot_timeout: DEFAULT_SNAPSHOT_TIMEOUT,
        }
    }

    pub fn with_snapshot_timeout(mut self, timeout: Duration) -> Self {
        self.snapshot_timeout = timeout;
        self
    }
}

/// Create the web router. Every route sits behind the session gate.
pub fn create_router(state: AppState) -> Router {
    let state = Arc::new(state);

    Router::new()
        .route("/health", get(health))
        .route("/login", get(login_page))
        .route("/unauthorized", get(unauthorized_page))
        .route("/dashboard", get(dashboard))
        .route("/api/events/{event_id}/attendees", get(list_attendees))
        .route(
            "/api/events/{event_id}/attendees/stream",
            get(stream_attendees),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            gate_requests,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Apply the gate's decision before the request reaches a handler.
async fn gate_requests(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let token = access_token(request.headers());
    let decision = state.gate.evaluate(&path, token.as_deref()).await;

    match decision.location(state.gate.config()) {
        None => next.run(request).await,
        Some(location) => {
            debug!(path, location, "gate redirect");
            Redirect::to(&location).into_response()
        }
    }
}

/// Token from the session cookie, falling back to a bearer header.
fn access_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(ACCESS_TOKEN_COOKIE) {
        return Some(cookie.value().to_string());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

async fn health() -> &'static str {
    "ok"
}

async fn login_page() -> Html<&'static str> {
    Html(
        "<!doctype html><title>eventdesk: sign in</title>\
         <p>Sign in with your organizer account to continue.</p>",
    )
}

async fn unauthorized_page() -> (StatusCode, Html<&'static str>) {
    (
        StatusCode::FORBIDDEN,
        Html(
            "<!doctype html><title>eventdesk: no access</title>\
             <p>Your account does not have access to the organizer dashboard.</p>",
        ),
    )
}

async fn dashboard() -> Html<&'static str> {
    Html("<!doctype html><title>eventdesk</title><p>Dashboard</p>")
}

/// One-shot read: bind, wait for the first snapshot to settle, unbind.
async fn list_attendees(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<Json<AttendeesBody>, WebError> {
    let handle = (state.attendees)();
    handle.activate(Some(event_id)).await?;

    let view = tokio::time::timeout(
        state.snapshot_timeout,
        handle.wait_for(|view| view.parent == Some(event_id) && !view.loading),
    )
    .await
    .map_err(|_| WebError::Timeout)??;

    Ok(Json(AttendeesBody::from(&*view)))
}

async fn stream_attendees(
    State(state): State<Arc<AppState>>,
    Path(event_id): Path<EventId>,
) -> Result<Response, WebError> {
    let handle = (state.attendees)();
    handle.activate(Some(event_id)).await?;
    debug!(%event_id, "attendee stream opened");
    Ok(attendee_stream(handle).into_response())
}
