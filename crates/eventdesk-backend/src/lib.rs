//! Shared backend client context for eventdesk.
//!
//! This crate provides the narrow collaborators the rest of the workspace
//! talks to the hosted backend through.
//!
//! ## Features
//!
//! - **REST**: table reads/writes and auth endpoints
//! - **Realtime**: one websocket multiplexing change-feed topics, with reconnects
//! - **Backend**: the process-wide singleton bundling both

mod backend;
mod client;
mod config;
mod error;
pub mod transport;
mod types;

pub use backend::Backend;
pub use client::RestClient;
pub use config::BackendConfig;
pub use error::BackendError;
pub use transport::{
    ChangeFrame, ChangeKind, JoinRequest, RealtimeTransport, TopicEvent, TopicGuard, TopicHandler,
    TopicStatus, TransportDriver,
};
pub use types::{AuthUser, Session};
