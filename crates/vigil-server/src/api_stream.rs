//! SSE stream of newly classified records.

use crate::AppState;
use axum::{
    extract::Extension,
    response::{sse::Event, Sse},
};
use futures_util::Stream;
use std::{convert::Infallible, sync::Arc};

/// Handler for `GET /api/anomalies/stream`.
///
/// Sends a `ping` connection marker, then an `anomaly` event per published
/// record and a `ping` keepalive after each quiet period. The observer is
/// unregistered when the client goes away and the stream is dropped.
pub async fn anomaly_stream_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.hub.subscribe();
    let keepalive = state.keepalive;

    let stream = futures_util::stream::unfold(subscription, move |mut sub| async move {
        let frame = sub.next_frame(keepalive).await?;
        match frame.data() {
            Ok(data) => {
                let event = Event::default()
                    .event(frame.event_name())
                    .id(frame.event_id())
                    .data(data);
                Some((Ok(event), sub))
            }
            Err(e) => {
                tracing::error!(
                    observer_id = %sub.id(),
                    error = %e,
                    "failed to serialize stream frame, closing stream"
                );
                None
            }
        }
    });

    Sse::new(stream)
}
