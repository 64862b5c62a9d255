use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::record::RequestRecord;
use crate::tracker::DebugBar;

#[derive(Debug, Serialize, Deserialize)]
pub struct DebugBarStatus {
    pub version: String,
    pub enabled: bool,
    pub requests: usize,
    pub capacity: usize,
    pub observers: usize,
    pub dropped_events: u64,
    pub capture_failures: u64,
    pub orphaned_subevents: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

pub async fn get_status(State(bar): State<DebugBar>) -> Json<DebugBarStatus> {
    let hub = bar.hub();
    Json(DebugBarStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        enabled: bar.is_enabled(),
        requests: bar.store().len(),
        capacity: bar.store().capacity(),
        observers: hub.observer_count(),
        dropped_events: hub.dropped_events(),
        capture_failures: bar.capture_failures(),
        orphaned_subevents: bar.orphaned_subevents(),
    })
}

/// Stored requests, oldest first. `limit` keeps only the most recent.
pub async fn list_requests(
    State(bar): State<DebugBar>,
    Query(params): Query<ListParams>,
) -> Json<Vec<Arc<RequestRecord>>> {
    match params.limit {
        Some(n) => Json(bar.recent_history(n)),
        None => Json(bar.history()),
    }
}

pub async fn get_request(State(bar): State<DebugBar>, Path(id): Path<String>) -> Response {
    match bar.get_request(&id) {
        Some(record) => Json(record).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "request not found", "id": id })),
        )
            .into_response(),
    }
}

pub async fn clear_requests(State(bar): State<DebugBar>) -> StatusCode {
    bar.clear_history();
    StatusCode::NO_CONTENT
}
