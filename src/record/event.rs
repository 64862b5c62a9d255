//! Broadcast envelope.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::record::types::{ErrorRecord, QueryRecord, RequestRecord};

/// A lifecycle transition published to observers. Never stored.
///
/// Serialized as `{"type": ..., "payload": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    #[serde(rename = "request")]
    RequestStarted(Arc<RequestRecord>),
    #[serde(rename = "query")]
    Query(QueryRecord),
    #[serde(rename = "error")]
    Error(ErrorRecord),
    #[serde(rename = "request_end")]
    RequestEnded(Arc<RequestRecord>),
}

impl Event {
    /// Wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RequestStarted(_) => "request",
            Event::Query(_) => "query",
            Event::Error(_) => "error",
            Event::RequestEnded(_) => "request_end",
        }
    }

    /// Identifier of the request this event belongs to.
    pub fn request_id(&self) -> &str {
        match self {
            Event::RequestStarted(r) | Event::RequestEnded(r) => &r.id,
            Event::Query(q) => &q.request_id,
            Event::Error(e) => &e.request_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_envelope() {
        let record = Arc::new(RequestRecord::new("GET", "/health"));
        let event = Event::RequestEnded(record.clone());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "request_end");
        assert_eq!(value["payload"]["id"], record.id.as_str());
        assert_eq!(event.request_id(), record.id);
        assert_eq!(event.kind(), "request_end");
    }
}
