//! The debug bar service object.

use arc_swap::ArcSwap;
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;

use crate::broadcast::{BroadcastHub, HubError, Observer, ObserverId};
use crate::config::DebugBarConfig;
use crate::context::Carrier;
use crate::history::HistoryStore;
use crate::lifecycle::Shutdown;
use crate::observability::metrics;
use crate::record::{ErrorRecord, Event, QueryRecord, RequestRecord, Severity};
use crate::tracker::capture::{capture_stack, RequestMeta, ResponseMeta};
use crate::tracker::open::OpenRequest;

struct Inner {
    config: ArcSwap<DebugBarConfig>,
    enabled: AtomicBool,
    store: HistoryStore,
    hub: Arc<BroadcastHub>,
    hub_started: AtomicBool,
    shutdown: Shutdown,
    capture_failures: AtomicU64,
    orphaned: AtomicU64,
}

/// Request tracker: opens, annotates, finalizes, stores and broadcasts
/// request records.
///
/// Constructed once per process and shared by cloning (cheap, `Arc`
/// inside). Every capture operation is infallible from the caller's point
/// of view; telemetry problems are counted, never returned.
#[derive(Clone)]
pub struct DebugBar {
    inner: Arc<Inner>,
}

impl DebugBar {
    /// Create a tracker. Call [`DebugBar::start`] to begin delivering
    /// events to observers.
    pub fn new(config: DebugBarConfig) -> Self {
        let store = HistoryStore::new(config.max_requests);
        let hub = Arc::new(BroadcastHub::new(
            config.hub.inbound_capacity,
            config.hub.observer_capacity,
        ));
        Self {
            inner: Arc::new(Inner {
                enabled: AtomicBool::new(config.enabled),
                config: ArcSwap::from_pointee(config),
                store,
                hub,
                hub_started: AtomicBool::new(false),
                shutdown: Shutdown::new(),
                capture_failures: AtomicU64::new(0),
                orphaned: AtomicU64::new(0),
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DebugBarConfig::default())
    }

    /// Spawn the hub dispatch loop on the current tokio runtime.
    ///
    /// Fails when called outside a runtime or more than once; without the
    /// loop no observer would ever receive an event.
    pub fn start(&self) -> Result<JoinHandle<()>, HubError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| HubError::NoRuntime)?;
        if self.inner.hub_started.swap(true, Ordering::AcqRel) {
            return Err(HubError::AlreadyRunning);
        }

        let hub = self.inner.hub.clone();
        let stop = self.inner.shutdown.subscribe();
        Ok(runtime.spawn(async move {
            if let Err(e) = hub.run(stop).await {
                tracing::error!(error = %e, "Broadcast hub failed");
            }
        }))
    }

    /// Stop the hub dispatch loop.
    pub fn shutdown(&self) {
        self.inner.shutdown.trigger();
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    /// Toggle tracking at runtime.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.inner.enabled.swap(enabled, Ordering::AcqRel);
        if was != enabled {
            tracing::info!(enabled, "Debug bar tracking toggled");
        }
    }

    /// The active configuration.
    pub fn config(&self) -> Arc<DebugBarConfig> {
        self.inner.config.load_full()
    }

    /// Swap in a reloaded configuration.
    pub fn apply_config(&self, config: DebugBarConfig) {
        let current = self.inner.config.load();
        if config.max_requests != current.max_requests {
            tracing::warn!(
                current = current.max_requests,
                requested = config.max_requests,
                "History capacity changes take effect after restart"
            );
        }
        if config.hub != current.hub {
            tracing::warn!("Hub queue size changes take effect after restart");
        }
        let enabled = config.enabled;
        self.inner.config.store(Arc::new(config));
        self.set_enabled(enabled);
        tracing::info!("Debug bar configuration applied");
    }

    // --- Lifecycle ---

    /// Open a request record and bind it to a fresh carrier.
    ///
    /// When tracking is disabled the returned carrier is detached and every
    /// later operation through it is a no-op.
    pub fn begin(&self, meta: RequestMeta) -> Carrier {
        if !self.is_enabled() {
            return Carrier::detached();
        }

        let mut record = RequestRecord::new(meta.method, meta.path);
        record.headers = meta.headers;
        record.query_params = meta.query_params;
        record.request_body = meta.body;
        record.client_ip = meta.client_ip;

        let open = Arc::new(OpenRequest::new(record));
        let carrier = Carrier::new();
        if let Err(e) = carrier.bind(open.clone()) {
            self.record_capture_failure("bind");
            tracing::warn!(error = %e, "Failed to bind request record");
            return carrier;
        }

        tracing::debug!(request_id = %open.id(), "Request tracking started");
        self.broadcast(|| Event::RequestStarted(Arc::new(open.snapshot())));
        carrier
    }

    /// The open request behind `carrier`, if tracking is on and it was bound.
    pub fn lookup(&self, carrier: &Carrier) -> Option<Arc<OpenRequest>> {
        if !self.is_enabled() {
            return None;
        }
        carrier.lookup()
    }

    /// Append a query to the carrier's request. Returns whether it was kept.
    pub fn attach_query(&self, carrier: &Carrier, mut query: QueryRecord) -> bool {
        let Some(open) = self.lookup(carrier) else {
            self.record_orphan("query");
            return false;
        };

        query.request_id = open.id().to_string();
        let failed = query.error.is_some();
        let copy = self.has_observers().then(|| query.clone());

        // Publishing under the lock keeps hub order equal to stored order.
        let kept = open.with_open(|record| {
            record.queries.push(query);
            if let Some(query) = copy {
                self.inner.hub.publish(Event::Query(query));
            }
        });
        if kept.is_none() {
            self.record_orphan("query");
            return false;
        }

        metrics::record_query(failed);
        true
    }

    /// Append an error to the carrier's request. Returns whether it was kept.
    pub fn attach_error(&self, carrier: &Carrier, mut error: ErrorRecord) -> bool {
        let Some(open) = self.lookup(carrier) else {
            self.record_orphan("error");
            return false;
        };

        error.request_id = open.id().to_string();
        let severity = error.severity;
        let copy = self.has_observers().then(|| error.clone());

        let kept = open.with_open(|record| {
            record.errors.push(error);
            if let Some(error) = copy {
                self.inner.hub.publish(Event::Error(error));
            }
        });
        if kept.is_none() {
            self.record_orphan("error");
            return false;
        }

        metrics::record_error(severity.as_str());
        true
    }

    /// Finalize the carrier's request, store it and announce it.
    ///
    /// Only the first call does anything; it returns the stored record.
    pub fn finish(&self, carrier: &Carrier, meta: ResponseMeta) -> Option<Arc<RequestRecord>> {
        let open = self.lookup(carrier)?;
        let record = open.finalize(&meta)?;

        metrics::record_request(&record.method, record.status_code, record.duration);
        tracing::debug!(
            request_id = %record.id,
            status = record.status_code,
            duration_ms = record.duration_ms,
            queries = record.queries.len(),
            errors = record.errors.len(),
            "Request tracking finished"
        );

        self.inner.store.add(record.clone());
        self.broadcast(|| Event::RequestEnded(record.clone()));
        Some(record)
    }

    // --- Errors and annotations ---

    /// Record a fault or diagnostic against the carrier's request.
    pub fn on_log_event(
        &self,
        carrier: &Carrier,
        severity: Severity,
        message: impl Into<String>,
        context: BTreeMap<String, Value>,
    ) -> bool {
        if self.lookup(carrier).is_none() {
            self.record_orphan("error");
            return false;
        }

        let error = ErrorRecord {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: String::new(),
            message: message.into(),
            stack: capture_stack(),
            severity,
            timestamp: Utc::now(),
            context,
        };
        self.attach_error(carrier, error)
    }

    pub fn log_error(&self, carrier: &Carrier, err: &dyn std::error::Error) -> bool {
        self.on_log_event(carrier, Severity::Exception, err.to_string(), BTreeMap::new())
    }

    pub fn log_error_with_context(
        &self,
        carrier: &Carrier,
        err: &dyn std::error::Error,
        context: BTreeMap<String, Value>,
    ) -> bool {
        self.on_log_event(carrier, Severity::Exception, err.to_string(), context)
    }

    pub fn log_warning(&self, carrier: &Carrier, message: impl Into<String>) -> bool {
        self.on_log_event(carrier, Severity::Warning, message, BTreeMap::new())
    }

    pub fn log_warning_with_context(
        &self,
        carrier: &Carrier,
        message: impl Into<String>,
        context: BTreeMap<String, Value>,
    ) -> bool {
        self.on_log_event(carrier, Severity::Warning, message, context)
    }

    pub fn log_notice(&self, carrier: &Carrier, message: impl Into<String>) -> bool {
        self.on_log_event(carrier, Severity::Notice, message, BTreeMap::new())
    }

    pub fn log_debug(&self, carrier: &Carrier, message: impl Into<String>) -> bool {
        self.on_log_event(carrier, Severity::Debug, message, BTreeMap::new())
    }

    pub fn log_debug_with_context(
        &self,
        carrier: &Carrier,
        message: impl Into<String>,
        context: BTreeMap<String, Value>,
    ) -> bool {
        self.on_log_event(carrier, Severity::Debug, message, context)
    }

    /// Attach a free-form annotation to the carrier's request.
    pub fn add_custom_data<T: Serialize>(&self, carrier: &Carrier, key: impl Into<String>, value: T) -> bool {
        let Some(open) = self.lookup(carrier) else {
            return false;
        };
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                self.record_capture_failure("custom_data");
                tracing::debug!(error = %e, "Custom data is not serializable");
                return false;
            }
        };
        let key = key.into();
        open.with_open(|record| {
            record.custom_data.insert(key, value);
        })
        .is_some()
    }

    // --- History ---

    /// All stored requests, oldest first.
    pub fn history(&self) -> Vec<Arc<RequestRecord>> {
        self.inner.store.all()
    }

    /// The `n` most recent requests, oldest first.
    pub fn recent_history(&self, n: usize) -> Vec<Arc<RequestRecord>> {
        self.inner.store.recent(n)
    }

    pub fn get_request(&self, id: &str) -> Option<Arc<RequestRecord>> {
        self.inner.store.get(id)
    }

    pub fn clear_history(&self) {
        self.inner.store.clear();
        tracing::info!("Request history cleared");
    }

    pub fn store(&self) -> &HistoryStore {
        &self.inner.store
    }

    // --- Observers ---

    pub fn subscribe(&self) -> Observer {
        self.inner.hub.subscribe()
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.inner.hub.unsubscribe(id)
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.inner.hub
    }

    /// Telemetry capture failures swallowed so far.
    pub fn capture_failures(&self) -> u64 {
        self.inner.capture_failures.load(Ordering::Relaxed)
    }

    /// Queries and errors dropped for lack of an open request while
    /// tracking was on.
    pub fn orphaned_subevents(&self) -> u64 {
        self.inner.orphaned.load(Ordering::Relaxed)
    }

    fn record_orphan(&self, kind: &'static str) {
        if !self.is_enabled() {
            return;
        }
        self.inner.orphaned.fetch_add(1, Ordering::Relaxed);
        metrics::record_orphan(kind);
    }

    pub(crate) fn record_capture_failure(&self, stage: &'static str) {
        self.inner.capture_failures.fetch_add(1, Ordering::Relaxed);
        metrics::record_capture_failure(stage);
    }

    fn has_observers(&self) -> bool {
        self.inner.hub.observer_count() > 0
    }

    /// Publish an event, building it only when someone is listening.
    fn broadcast(&self, make: impl FnOnce() -> Event) {
        if self.has_observers() {
            self.inner.hub.publish(make());
        }
    }
}

impl std::fmt::Debug for DebugBar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugBar")
            .field("enabled", &self.is_enabled())
            .field("history", &self.inner.store.len())
            .field("hub", &self.inner.hub)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bar() -> DebugBar {
        DebugBar::with_defaults()
    }

    fn query(sql: &str) -> QueryRecord {
        QueryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: String::new(),
            query: sql.to_string(),
            args: Vec::new(),
            duration: std::time::Duration::from_millis(1),
            duration_ms: 1.0,
            rows_affected: 1,
            error: None,
            start_time: Utc::now(),
            source: String::new(),
        }
    }

    #[test]
    fn test_begin_captures_metadata() {
        let bar = bar();
        let carrier = bar.begin(
            RequestMeta::new("POST", "/users")
                .header("Content-Type", "application/json")
                .client_ip("10.1.2.3")
                .body("{}"),
        );
        let open = bar.lookup(&carrier).unwrap();
        let snapshot = open.snapshot();
        assert_eq!(snapshot.method, "POST");
        assert_eq!(snapshot.client_ip, "10.1.2.3");
        assert_eq!(snapshot.request_body.as_deref(), Some("{}"));
        assert!(bar.history().is_empty());
    }

    #[test]
    fn test_queries_kept_in_call_order() {
        let bar = bar();
        let carrier = bar.begin(RequestMeta::new("GET", "/users"));
        assert!(bar.attach_query(&carrier, query("SELECT 1")));
        assert!(bar.attach_query(&carrier, query("SELECT 2")));

        let record = bar.finish(&carrier, ResponseMeta::new(200, 12)).unwrap();
        let sql: Vec<_> = record.queries.iter().map(|q| q.query.as_str()).collect();
        assert_eq!(sql, vec!["SELECT 1", "SELECT 2"]);
        assert!(record.queries.iter().all(|q| q.request_id == record.id));
        assert_eq!(record.status_code, 200);
        assert_eq!(record.response_size, 12);
    }

    #[test]
    fn test_finish_is_idempotent() {
        let bar = bar();
        let carrier = bar.begin(RequestMeta::new("GET", "/"));
        assert!(bar.finish(&carrier, ResponseMeta::new(200, 0)).is_some());
        assert!(bar.finish(&carrier, ResponseMeta::new(500, 0)).is_none());

        let history = bar.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status_code, 200);
    }

    #[test]
    fn test_attach_after_finish_is_dropped() {
        let bar = bar();
        let carrier = bar.begin(RequestMeta::new("GET", "/"));
        bar.finish(&carrier, ResponseMeta::new(200, 0));

        assert!(!bar.attach_query(&carrier, query("SELECT late")));
        assert!(!bar.log_warning(&carrier, "late"));
        let stored = bar.history();
        assert!(stored[0].queries.is_empty());
        assert!(stored[0].errors.is_empty());
    }

    #[test]
    fn test_unbound_carrier_is_ignored() {
        let bar = bar();
        let stray = Carrier::detached();
        assert!(!bar.log_notice(&stray, "nobody home"));
        assert!(!bar.attach_query(&stray, query("SELECT 1")));
        assert!(!bar.add_custom_data(&stray, "k", 1));
        assert!(bar.finish(&stray, ResponseMeta::default()).is_none());
        assert!(bar.history().is_empty());
    }

    #[test]
    fn test_orphans_counted_only_while_enabled() {
        let bar = bar();
        assert!(!bar.log_warning(&Carrier::detached(), "stray"));
        assert_eq!(bar.orphaned_subevents(), 1);

        let carrier = bar.begin(RequestMeta::new("GET", "/"));
        bar.set_enabled(false);
        assert!(!bar.log_warning(&carrier, "ignored"));
        assert!(!bar.log_warning(&Carrier::detached(), "ignored"));
        assert_eq!(bar.orphaned_subevents(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_queries_stream_in_stored_order() {
        let bar = bar();
        let mut observer = bar.subscribe();
        let _hub = bar.start().unwrap();
        let carrier = bar.begin(RequestMeta::new("GET", "/"));

        let writers: Vec<_> = (0..4)
            .map(|w| {
                let bar = bar.clone();
                let carrier = carrier.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        bar.attach_query(&carrier, query(&format!("SELECT {w}, {i}")));
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        let record = bar.finish(&carrier, ResponseMeta::new(200, 0)).unwrap();

        let mut streamed = Vec::new();
        while streamed.len() < record.queries.len() {
            let event = tokio::time::timeout(std::time::Duration::from_secs(1), observer.recv())
                .await
                .unwrap()
                .unwrap();
            if let Event::Query(query) = event.as_ref() {
                streamed.push(query.query.clone());
            }
        }
        let stored: Vec<_> = record.queries.iter().map(|q| q.query.clone()).collect();
        assert_eq!(streamed, stored);
        bar.shutdown();
    }

    #[test]
    fn test_disabled_is_a_no_op() {
        let mut config = DebugBarConfig::default();
        config.enabled = false;
        let bar = DebugBar::new(config);

        let carrier = bar.begin(RequestMeta::new("GET", "/"));
        assert!(!carrier.is_bound());
        assert!(!bar.log_debug(&carrier, "ignored"));
        assert!(bar.finish(&carrier, ResponseMeta::new(200, 0)).is_none());
        assert!(bar.history().is_empty());
    }

    #[test]
    fn test_toggle_while_open_abandons_record() {
        let bar = bar();
        let carrier = bar.begin(RequestMeta::new("GET", "/"));
        bar.set_enabled(false);
        assert!(bar.finish(&carrier, ResponseMeta::new(200, 0)).is_none());
        bar.set_enabled(true);
        assert!(bar.history().is_empty());
    }

    #[test]
    fn test_errors_and_custom_data() {
        let bar = bar();
        let carrier = bar.begin(RequestMeta::new("GET", "/error"));
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk on fire");

        let mut context = BTreeMap::new();
        context.insert("user_id".to_string(), json!(123));
        assert!(bar.log_error_with_context(&carrier, &io, context));
        assert!(bar.log_warning(&carrier, "careful"));
        assert!(bar.add_custom_data(&carrier, "created_user_id", 7));

        let record = bar.finish(&carrier, ResponseMeta::new(500, 0)).unwrap();
        assert_eq!(record.errors.len(), 2);
        assert_eq!(record.errors[0].severity, Severity::Exception);
        assert_eq!(record.errors[0].message, "disk on fire");
        assert_eq!(record.errors[0].context["user_id"], json!(123));
        assert!(!record.errors[0].stack.is_empty());
        assert_eq!(record.errors[1].severity, Severity::Warning);
        assert_eq!(record.custom_data["created_user_id"], json!(7));
    }

    #[test]
    fn test_apply_config_toggles_enabled() {
        let bar = bar();
        let mut config = DebugBarConfig::default();
        config.enabled = false;
        config.capture_request_body = false;
        bar.apply_config(config);

        assert!(!bar.is_enabled());
        assert!(!bar.config().capture_request_body);
    }

    #[test]
    fn test_start_requires_runtime() {
        let bar = bar();
        assert!(matches!(bar.start(), Err(HubError::NoRuntime)));
    }

    #[tokio::test]
    async fn test_start_only_once() {
        let bar = bar();
        let handle = bar.start().unwrap();
        assert!(matches!(bar.start(), Err(HubError::AlreadyRunning)));
        bar.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
