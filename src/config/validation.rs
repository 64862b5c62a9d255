//! Configuration validation.
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first
//! - Pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before a config is accepted, at startup and on reload

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::AppConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check semantic constraints serde cannot express.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let bar = &config.debugbar;

    if bar.max_requests == 0 {
        errors.push(ValidationError::new("debugbar.max_requests", "must be greater than 0"));
    }
    if bar.max_body_size == 0 {
        errors.push(ValidationError::new("debugbar.max_body_size", "must be greater than 0"));
    }
    if bar.hub.inbound_capacity == 0 {
        errors.push(ValidationError::new("debugbar.hub.inbound_capacity", "must be greater than 0"));
    }
    if bar.hub.observer_capacity == 0 {
        errors.push(ValidationError::new("debugbar.hub.observer_capacity", "must be greater than 0"));
    }
    if !bar.websocket_path.starts_with('/') {
        errors.push(ValidationError::new("debugbar.websocket_path", "must start with '/'"));
    }
    if !bar.api_prefix.starts_with('/') {
        errors.push(ValidationError::new("debugbar.api_prefix", "must start with '/'"));
    }
    if bar.websocket_path.starts_with(&bar.api_prefix) {
        errors.push(ValidationError::new(
            "debugbar.websocket_path",
            format!("must not live under api_prefix {}", bar.api_prefix),
        ));
    }
    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("invalid socket address: {}", config.server.bind_address),
        ));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("invalid socket address: {}", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
