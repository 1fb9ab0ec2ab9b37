//! Server-Sent Events for live attendee views.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use eventdesk_sync::{Attendee, SyncHandle};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::warn;

use crate::view::AttendeesBody;

/// Stream every view `handle` publishes as an `attendees` event.
///
/// The stream owns the handle, so the sync binding lives exactly as long
/// as the client stays connected.
pub fn attendee_stream(
    handle: SyncHandle<Attendee>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(handle.subscribe()).filter_map(move |view| {
        let _owner = &handle;
        match Event::default()
            .event("attendees")
            .json_data(AttendeesBody::from(&*view))
        {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, "failed to encode attendee view");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
