//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use debugbar::config::DebugBarConfig;
use debugbar::{hooks, Carrier, DebugBar, Event, Observer, QueryOutcome, QueryRecord};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// A tracker with the given history capacity, hub already running.
pub fn started_bar(max_requests: usize) -> DebugBar {
    let config = DebugBarConfig {
        max_requests,
        ..DebugBarConfig::default()
    };
    let bar = DebugBar::new(config);
    bar.start().unwrap();
    bar
}

pub fn query(sql: &str) -> QueryRecord {
    QueryRecord {
        id: uuid::Uuid::new_v4().to_string(),
        request_id: String::new(),
        query: sql.to_string(),
        args: Vec::new(),
        duration: Duration::from_micros(250),
        duration_ms: 0.25,
        rows_affected: 0,
        error: None,
        start_time: Utc::now(),
        source: "tests/common/mod.rs".to_string(),
    }
}

/// Next event for `observer`, failing the test after one second.
pub async fn next_event(observer: &mut Observer) -> Arc<Event> {
    tokio::time::timeout(Duration::from_secs(1), observer.recv())
        .await
        .expect("timed out waiting for event")
        .expect("observer closed")
}

/// Assert nothing else arrives within a short grace period.
pub async fn assert_quiet(observer: &mut Observer) {
    let extra = tokio::time::timeout(Duration::from_millis(100), observer.recv()).await;
    assert!(extra.is_err(), "unexpected event: {:?}", extra);
}

async fn users(State(bar): State<DebugBar>, carrier: Carrier) -> Json<serde_json::Value> {
    let token = bar.on_operation_start(&carrier);
    bar.on_operation_end(token, QueryOutcome::new("SELECT * FROM users").rows_affected(2));
    Json(json!([{ "id": 1 }, { "id": 2 }]))
}

async fn echo(State(bar): State<DebugBar>, carrier: Carrier, body: String) -> String {
    bar.add_custom_data(&carrier, "echo_len", body.len());
    body
}

async fn fail(State(bar): State<DebugBar>, carrier: Carrier) -> StatusCode {
    bar.log_warning(&carrier, "something looked off");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn boom() -> &'static str {
    panic!("boom");
}

/// Small instrumented app with the debug bar routes mounted.
pub fn app(bar: DebugBar) -> Router {
    let routes = Router::new()
        .route("/users", get(users))
        .route("/echo", axum::routing::post(echo))
        .route("/fail", get(fail))
        .route("/panic", get(boom))
        .with_state(bar.clone());

    hooks::instrument(routes, bar.clone()).merge(bar.routes())
}

/// Serve `app` on an ephemeral port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}
