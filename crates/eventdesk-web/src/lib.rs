//! Web surface for eventdesk.
//!
//! Every request passes the session gate first. Attendee lists are served
//! as one-shot JSON reads or as a live SSE stream backed by its own sync
//! binding.

mod error;
mod routes;
mod sse;
mod view;

pub use error::WebError;
pub use routes::{ACCESS_TOKEN_COOKIE, AppState, AttendeeSyncFactory, create_router};
pub use view::AttendeesBody;
