//! Observer transport: websocket stream and JSON management API.
//!
//! # Data Flow
//! ```text
//! browser / debugbar-cli
//!     → GET {websocket_path}       → ws.rs → Observer (broadcast hub)
//!     → {api_prefix}/status        → api.rs
//!     → {api_prefix}/requests      → api.rs → HistoryStore
//! ```
//!
//! # Design Decisions
//! - Routes are mounted from the config at build time; reloading a path
//!   requires a restart
//! - The transport is just another observer; the hub knows nothing of sockets

pub mod api;
pub mod wire;
pub mod ws;

use axum::{routing::get, Router};

use crate::tracker::DebugBar;
use self::api::*;

impl DebugBar {
    /// Router serving the websocket endpoint and the management API.
    pub fn routes(&self) -> Router {
        let config = self.config();

        let api = Router::new()
            .route("/status", get(get_status))
            .route("/requests", get(list_requests).delete(clear_requests))
            .route("/requests/{id}", get(get_request));

        Router::new()
            .route(&config.websocket_path, get(ws::websocket))
            .nest(&config.api_prefix, api)
            .with_state(self.clone())
    }
}
