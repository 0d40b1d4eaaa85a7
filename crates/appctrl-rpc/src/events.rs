//! Server-Sent-Events stream of app notifications.
//!
//! Each event's name is the notification kind (`app-output`,
//! `app-stopped`, `app-state-changed`) and its data the JSON payload.

use crate::server::AppState;
use appctrl_core::EventSubscription;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{self, Stream};
use std::sync::Arc;
use tracing::debug;

/// `GET /events`
pub async fn handle_events(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    debug!("SSE subscriber connected");
    Sse::new(event_stream(state.api.subscribe())).keep_alive(KeepAlive::default())
}

fn event_stream(subscription: EventSubscription) -> impl Stream<Item = Result<Event, axum::Error>> {
    stream::unfold(subscription, |mut sub| async move {
        let event = sub.recv().await?;
        let sse = Event::default().event(event.name()).json_data(event.payload());
        Some((sse, sub))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use appctrl_core::{EventChannel, TerminationReason};
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_yields_events_in_order() {
        let channel = EventChannel::new();
        let mut events = Box::pin(event_stream(channel.subscribe()));

        channel.emit_info("a1", "hello");
        channel.emit_terminated("a1", Some(0), TerminationReason::Exited);

        assert!(events.next().await.unwrap().is_ok());
        assert!(events.next().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_stream_ends_when_channel_drops() {
        let channel = EventChannel::new();
        let mut events = Box::pin(event_stream(channel.subscribe()));
        drop(channel);
        assert!(events.next().await.is_none());
    }
}
