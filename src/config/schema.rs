//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from TOML files and
//! every field has a default, so an empty file is a valid configuration.

use serde::{Deserialize, Serialize};

/// Root configuration for the demo server and the debug bar.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Listener and request limits of the host server.
    pub server: ServerConfig,

    /// Request tracking settings.
    pub debugbar: DebugBarConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Host server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Maximum accepted request body in bytes.
    pub body_limit_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            request_timeout_secs: 30,
            body_limit_bytes: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Debug bar configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct DebugBarConfig {
    /// Master switch. When off every hook is a no-op.
    pub enabled: bool,

    /// Finalized requests kept in history.
    pub max_requests: usize,

    /// Capture request bodies.
    pub capture_request_body: bool,

    /// Largest body captured, in bytes.
    pub max_body_size: usize,

    /// Path of the observer WebSocket endpoint.
    pub websocket_path: String,

    /// Prefix of the JSON management API.
    pub api_prefix: String,

    /// Origins allowed to open the WebSocket ("*" allows all).
    pub allowed_origins: Vec<String>,

    /// Broadcast queue sizes.
    pub hub: HubConfig,
}

impl Default for DebugBarConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: 100,
            capture_request_body: true,
            max_body_size: 64 * 1024, // 64KB
            websocket_path: "/_debugbar/ws".to_string(),
            api_prefix: "/_debugbar/api".to_string(),
            allowed_origins: vec!["*".to_string()],
            hub: HubConfig::default(),
        }
    }
}

impl DebugBarConfig {
    /// Whether a browser origin may connect as an observer.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.iter().any(|o| o == "*") {
            return true;
        }
        match origin {
            // Non-browser clients send no Origin header.
            None => true,
            Some(origin) => self
                .allowed_origins
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(origin)),
        }
    }

    /// Whether a request path belongs to the debug bar's own endpoints.
    pub fn is_internal_path(&self, path: &str) -> bool {
        if path == self.websocket_path {
            return true;
        }
        let prefix = self.api_prefix.trim_end_matches('/');
        match path.strip_prefix(prefix) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }
}

/// Broadcast hub queue sizes.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct HubConfig {
    /// Events waiting for the dispatch loop.
    pub inbound_capacity: usize,

    /// Events waiting for each observer.
    pub observer_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            observer_capacity: 256,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
