//! Session gating and identity for eventdesk.
//!
//! - [`SessionGate`]: per-request allow/redirect decisions from fresh role state
//! - [`IdentityContext`]: observer-facing view of the signed-in user, kept in
//!   sync with identity-change notifications
//! - Collaborator traits with REST implementations over the backend auth
//!   service

mod error;
pub mod gate;
pub mod identity;
pub mod provider;
mod types;

pub use error::SessionError;
pub use gate::{Caller, Decision, GateConfig, PathClass, SessionGate, decide};
pub use identity::{IdentityContext, IdentitySnapshot};
pub use provider::{
    AuthorizationSource, IdentityProvider, RestAuthorization, RestIdentityProvider,
    RestSessionLookup, SessionLookup,
};
pub use types::{AccessGrant, Organization, Profile, SessionChange};
