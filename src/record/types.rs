//! Request, query and error records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// One tracked unit of work (usually one inbound HTTP request).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    /// Process-unique identifier, assigned once at creation.
    pub id: String,
    pub method: String,
    pub path: String,
    pub status_code: u16,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    pub duration_ms: f64,
    pub start_time: DateTime<Utc>,
    /// Unset until the record is finalized.
    pub end_time: Option<DateTime<Utc>>,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub response_size: u64,
    pub client_ip: String,
    pub queries: Vec<QueryRecord>,
    pub errors: Vec<ErrorRecord>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_data: BTreeMap<String, Value>,
}

impl RequestRecord {
    /// Create an open record with a fresh identifier.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            method: method.into(),
            path: path.into(),
            status_code: 0,
            duration: Duration::ZERO,
            duration_ms: 0.0,
            start_time: Utc::now(),
            end_time: None,
            headers: BTreeMap::new(),
            query_params: BTreeMap::new(),
            request_body: None,
            response_size: 0,
            client_ip: String::new(),
            queries: Vec::new(),
            errors: Vec::new(),
            custom_data: BTreeMap::new(),
        }
    }

    /// Whether the record has been through finalization.
    pub fn is_finished(&self) -> bool {
        self.end_time.is_some()
    }
}

/// One data-access operation executed inside a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: String,
    /// Owning request. A back-reference only; the request owns the query.
    pub request_id: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(with = "duration_nanos")]
    pub duration: Duration,
    pub duration_ms: f64,
    pub rows_affected: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub start_time: DateTime<Utc>,
    /// `file:line` of the code that issued the operation.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source: String,
}

/// Severity class of a captured fault or diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Exception,
    Warning,
    Notice,
    Debug,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Exception => "exception",
            Severity::Warning => "warning",
            Severity::Notice => "notice",
            Severity::Debug => "debug",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "exception" | "error" => Ok(Severity::Exception),
            "warning" | "warn" => Ok(Severity::Warning),
            "notice" | "info" => Ok(Severity::Notice),
            "debug" => Ok(Severity::Debug),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// One captured fault or diagnostic message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: String,
    pub request_id: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub stack: String,
    #[serde(rename = "type")]
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, Value>,
}

/// Durations travel as integer nanoseconds.
mod duration_nanos {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_nanos)
    }
}

/// Milliseconds as a float, the unit dashboards display.
pub(crate) fn as_millis_f64(d: Duration) -> f64 {
    d.as_nanos() as f64 / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_records_get_unique_ids() {
        let a = RequestRecord::new("GET", "/");
        let b = RequestRecord::new("GET", "/");
        assert_ne!(a.id, b.id);
        assert!(!a.is_finished());
    }

    #[test]
    fn test_severity_wire_names() {
        let json = serde_json::to_string(&Severity::Exception).unwrap();
        assert_eq!(json, "\"exception\"");
        assert_eq!("warn".parse::<Severity>().unwrap(), Severity::Warning);
        assert!("fatal".parse::<Severity>().is_err());
    }

    #[test]
    fn test_request_json_shape() {
        let mut record = RequestRecord::new("POST", "/users");
        record.duration = Duration::from_micros(1500);
        record.duration_ms = as_millis_f64(record.duration);

        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["duration"], 1_500_000);
        assert_eq!(value["duration_ms"], 1.5);
        assert_eq!(value["method"], "POST");
        assert!(value.get("request_body").is_none());
        assert!(value.get("custom_data").is_none());
        assert!(value["queries"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_error_record_uses_type_field() {
        let err = ErrorRecord {
            id: "e1".into(),
            request_id: "r1".into(),
            message: "boom".into(),
            stack: String::new(),
            severity: Severity::Notice,
            timestamp: Utc::now(),
            context: BTreeMap::new(),
        };
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["type"], "notice");
        assert!(value.get("stack").is_none());
    }
}
