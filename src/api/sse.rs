//! Server-Sent Events for streamed replies

use super::types::ErrorResponse;
use crate::session::{ReplyEvent, SessionError, Turn};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;

/// Echo the user turn, then relay the reply as it arrives
pub fn reply_sse(
    user_turn: Turn,
    events: impl Stream<Item = ReplyEvent> + Send + 'static,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let init = stream::once(async move {
        Ok(Event::default()
            .event("user_turn")
            .data(json!({ "turn": user_turn }).to_string()))
    });

    let replies = events.map(|event| Ok(reply_event_to_axum(event)));

    Sse::new(init.chain(replies)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn reply_event_to_axum(event: ReplyEvent) -> Event {
    let (event_type, data) = match event {
        ReplyEvent::Fragment(text) => ("fragment", json!({ "text": text })),
        ReplyEvent::Complete(turn) => ("done", json!({ "turn": turn })),
        ReplyEvent::Failed(e) => ("error", error_json(&e)),
    };

    Event::default().event(event_type).data(data.to_string())
}

fn error_json(e: &SessionError) -> serde_json::Value {
    json!(ErrorResponse::new(e.to_string(), e.kind(), e.is_retryable()))
}
