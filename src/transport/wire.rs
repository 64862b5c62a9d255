//! Frames exchanged with websocket observers.
//!
//! Live events are sent as serialized [`Event`](crate::record::Event)s and
//! share the same `{"type", "payload"}` envelope as the frames here.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::record::RequestRecord;

/// Server frames that are not lifecycle events.
#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Snapshot of the history store, sent once on connect.
    History(Vec<Arc<RequestRecord>>),
    /// Events dropped for this observer since the last report.
    Missed { count: u64 },
    Pong,
}

/// Frames a dashboard client may send.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientMessage {
    Ping,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_envelopes() {
        let pong = serde_json::to_value(ServerMessage::Pong).unwrap();
        assert_eq!(pong, json!({"type": "pong"}));

        let missed = serde_json::to_value(ServerMessage::Missed { count: 3 }).unwrap();
        assert_eq!(missed, json!({"type": "missed", "payload": {"count": 3}}));

        let history = serde_json::to_value(ServerMessage::History(Vec::new())).unwrap();
        assert_eq!(history, json!({"type": "history", "payload": []}));
    }

    #[test]
    fn test_client_ping() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping","payload":null}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"subscribe"}"#).is_err());
    }
}
