//! Data-access integration: time an operation and attach it as a query.
//!
//! A data layer calls [`DebugBar::on_operation_start`] before it talks to
//! its store and [`DebugBar::on_operation_end`] afterwards.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::panic::Location;
use std::time::Instant;

use crate::context::Carrier;
use crate::record::types::as_millis_f64;
use crate::record::QueryRecord;
use crate::tracker::DebugBar;

/// Handle returned by [`DebugBar::on_operation_start`].
///
/// Inert when tracking was off at start; ending it then does nothing.
#[derive(Debug)]
pub struct QueryToken {
    active: Option<ActiveQuery>,
}

#[derive(Debug)]
struct ActiveQuery {
    carrier: Carrier,
    start_time: DateTime<Utc>,
    started: Instant,
    source: String,
}

impl QueryToken {
    /// `file:line` of the code that started the operation.
    pub fn source(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.source.as_str())
    }

    pub fn is_inert(&self) -> bool {
        self.active.is_none()
    }
}

/// What the data layer reports once an operation completes.
#[derive(Debug, Clone, Default)]
pub struct QueryOutcome {
    pub query: String,
    pub args: Vec<Value>,
    pub rows_affected: i64,
    pub error: Option<String>,
}

impl QueryOutcome {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn rows_affected(mut self, rows: i64) -> Self {
        self.rows_affected = rows;
        self
    }

    pub fn error(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

impl DebugBar {
    /// Start timing a data operation for the carrier's request.
    #[track_caller]
    pub fn on_operation_start(&self, carrier: &Carrier) -> QueryToken {
        if !self.is_enabled() {
            return QueryToken { active: None };
        }
        let caller = Location::caller();
        QueryToken {
            active: Some(ActiveQuery {
                carrier: carrier.clone(),
                start_time: Utc::now(),
                started: Instant::now(),
                source: format!("{}:{}", caller.file(), caller.line()),
            }),
        }
    }

    /// Finish timing and attach the operation to its request.
    ///
    /// Returns `false` when the request is unknown or already finished.
    pub fn on_operation_end(&self, token: QueryToken, outcome: QueryOutcome) -> bool {
        let Some(token) = token.active else {
            return false;
        };
        let duration = token.started.elapsed();
        let query = QueryRecord {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: String::new(),
            query: outcome.query,
            args: outcome.args,
            duration,
            duration_ms: as_millis_f64(duration),
            rows_affected: outcome.rows_affected,
            error: outcome.error,
            start_time: token.start_time,
            source: token.source,
        };
        self.attach_query(&token.carrier, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{RequestMeta, ResponseMeta};
    use serde_json::json;

    #[test]
    fn test_operation_is_attached_with_source() {
        let bar = DebugBar::with_defaults();
        let carrier = bar.begin(RequestMeta::new("GET", "/users/1"));

        let token = bar.on_operation_start(&carrier);
        assert!(token.source().unwrap().contains("data.rs"));
        let outcome = QueryOutcome::new("SELECT * FROM users WHERE id = ?")
            .arg(1)
            .rows_affected(1);
        assert!(bar.on_operation_end(token, outcome));

        let record = bar.finish(&carrier, ResponseMeta::new(200, 0)).unwrap();
        let query = &record.queries[0];
        assert_eq!(query.args, vec![json!(1)]);
        assert_eq!(query.rows_affected, 1);
        assert_eq!(query.request_id, record.id);
        assert!(query.source.contains("data.rs"));
        assert!(query.error.is_none());
    }

    #[test]
    fn test_failed_operation_keeps_error() {
        let bar = DebugBar::with_defaults();
        let carrier = bar.begin(RequestMeta::new("GET", "/users/9"));

        let token = bar.on_operation_start(&carrier);
        bar.on_operation_end(token, QueryOutcome::new("SELECT 1").error("record not found"));

        let record = bar.finish(&carrier, ResponseMeta::new(404, 0)).unwrap();
        assert_eq!(record.queries[0].error.as_deref(), Some("record not found"));
    }

    #[test]
    fn test_operation_without_request_is_dropped() {
        let bar = DebugBar::with_defaults();
        let token = bar.on_operation_start(&Carrier::detached());
        assert!(!bar.on_operation_end(token, QueryOutcome::new("SELECT 1")));
        assert_eq!(bar.orphaned_subevents(), 1);
    }

    #[test]
    fn test_disabled_operation_is_inert() {
        let bar = DebugBar::with_defaults();
        let carrier = bar.begin(RequestMeta::new("GET", "/users"));
        bar.set_enabled(false);

        let token = bar.on_operation_start(&carrier);
        assert!(token.is_inert());
        assert!(token.source().is_none());
        assert!(!bar.on_operation_end(token, QueryOutcome::new("SELECT 1")));
        assert_eq!(bar.orphaned_subevents(), 0);

        bar.set_enabled(true);
        let record = bar.finish(&carrier, ResponseMeta::new(200, 0)).unwrap();
        assert!(record.queries.is_empty());
    }
}
