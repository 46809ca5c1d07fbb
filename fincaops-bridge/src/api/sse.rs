//! Server-Sent Events for the operator console

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

use crate::AppState;

/// GET /events - stream of bridge events
///
/// Named events per variant (TicketsRefreshed, TicketPromoted, ...) with
/// JSON payloads; the console re-fetches the ticket list on each one it
/// cares about.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    fincaops_common::sse::create_event_sse_stream(&state.event_bus, "fincaops-bridge")
}
