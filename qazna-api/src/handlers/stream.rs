use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use futures::StreamExt;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;

use crate::AppState;

/// SSE subscription to the transfer fan-out. Lagging subscribers skip
/// missed events instead of stalling the hub.
pub async fn subscribe(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.stream.subscribe();
    let stream = BroadcastStream::new(receiver).filter_map(|message| async move {
        let event = message.ok()?;
        let event = Event::default().event("transfer").json_data(&event).ok()?;
        Some(Ok(event))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
