//! Metrics collection and exposition.
//!
//! # Metrics
//! - `debugbar_requests_tracked_total` (counter): finalized requests by method, status
//! - `debugbar_request_duration_seconds` (histogram): tracked request latency
//! - `debugbar_queries_captured_total` (counter): queries attached to a request
//! - `debugbar_errors_captured_total` (counter): errors attached, by severity
//! - `debugbar_subevents_dropped_total` (counter): queries/errors with no owner
//! - `debugbar_events_published_total` (counter): events accepted by the hub, by kind
//! - `debugbar_events_dropped_total` (counter): events dropped, by reason
//! - `debugbar_capture_failures_total` (counter): swallowed capture failures, by stage
//! - `debugbar_history_size` (gauge): records held in history
//! - `debugbar_observers` (gauge): live observers
//!
//! # Design Decisions
//! - Thin wrappers around the `metrics` facade; without an installed
//!   recorder every call is a no-op
//! - The Prometheus exporter is opt-in via configuration

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::time::Duration;

/// Install the Prometheus exporter with an HTTP listener on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, duration: Duration) {
    counter!(
        "debugbar_requests_tracked_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("debugbar_request_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_query(failed: bool) {
    counter!("debugbar_queries_captured_total", "failed" => failed.to_string()).increment(1);
}

pub fn record_error(severity: &'static str) {
    counter!("debugbar_errors_captured_total", "severity" => severity).increment(1);
}

pub fn record_orphan(kind: &'static str) {
    counter!("debugbar_subevents_dropped_total", "kind" => kind).increment(1);
}

pub fn record_event_published(kind: &'static str) {
    counter!("debugbar_events_published_total", "kind" => kind).increment(1);
}

pub fn record_event_dropped(reason: &'static str) {
    counter!("debugbar_events_dropped_total", "reason" => reason).increment(1);
}

pub fn record_capture_failure(stage: &'static str) {
    counter!("debugbar_capture_failures_total", "stage" => stage).increment(1);
}

pub fn record_history_size(size: usize) {
    gauge!("debugbar_history_size").set(size as f64);
}

pub fn record_observers(count: usize) {
    gauge!("debugbar_observers").set(count as f64);
}
