//! Live event stream for dashboard clients.
//!
//! # Message Protocol
//!
//! **Server → Client (on connect):**
//! ```json
//! { "type": "history", "payload": [ { "id": "...", "method": "GET", ... } ] }
//! ```
//!
//! **Server → Client (live):**
//! ```json
//! { "type": "request" | "query" | "error" | "request_end", "payload": { ... } }
//! { "type": "missed", "payload": { "count": 12 } }
//! ```
//!
//! **Client → Server:**
//! ```json
//! { "type": "ping", "payload": null }
//! ```
//! answered with `{ "type": "pong" }`.

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header::ORIGIN, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Serialize;

use crate::transport::wire::{ClientMessage, ServerMessage};
use crate::tracker::DebugBar;

/// Upgrade handler. Rejects origins outside `allowed_origins` with 403.
pub async fn websocket(
    ws: WebSocketUpgrade,
    State(bar): State<DebugBar>,
    headers: HeaderMap,
) -> Response {
    let origin = headers.get(ORIGIN).and_then(|v| v.to_str().ok());
    if !bar.config().origin_allowed(origin) {
        tracing::warn!(origin = ?origin, "Rejected observer from disallowed origin");
        return (StatusCode::FORBIDDEN, "Origin not allowed").into_response();
    }

    ws.on_upgrade(move |socket| serve_observer(socket, bar))
}

/// Stream history then live events until either side goes away.
///
/// The observer is registered before the history snapshot is taken, so a
/// request finishing in between is seen at least once.
async fn serve_observer(socket: WebSocket, bar: DebugBar) {
    let mut observer = bar.subscribe();
    let id = observer.id();
    tracing::info!(observer = %id, "Observer connected");

    let (mut sender, mut receiver) = socket.split();

    if send_json(&mut sender, &bar, &ServerMessage::History(bar.history()))
        .await
        .is_err()
    {
        bar.unsubscribe(id);
        return;
    }

    loop {
        tokio::select! {
            event = observer.recv() => {
                let Some(event) = event else {
                    break;
                };
                let missed = observer.take_missed();
                if missed > 0
                    && send_json(&mut sender, &bar, &ServerMessage::Missed { count: missed })
                        .await
                        .is_err()
                {
                    break;
                }
                if send_json(&mut sender, &bar, event.as_ref()).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Ping) => {
                            if send_json(&mut sender, &bar, &ServerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::debug!(observer = %id, error = %e, "Ignoring unknown client frame");
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(observer = %id, error = %e, "Observer socket error");
                    break;
                }
            }
        }
    }

    bar.unsubscribe(id);
    tracing::info!(observer = %id, "Observer disconnected");
}

/// Serialize and send one frame. Only socket errors are returned; a frame
/// that fails to serialize is counted and skipped.
async fn send_json<T: Serialize + ?Sized>(
    sender: &mut SplitSink<WebSocket, Message>,
    bar: &DebugBar,
    value: &T,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(value) {
        Ok(text) => text,
        Err(e) => {
            bar.record_capture_failure("serialize");
            tracing::warn!(error = %e, "Failed to serialize observer frame");
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}
