//! Metadata handed to the tracker by host and data-access hooks.

use std::backtrace::Backtrace;
use std::collections::BTreeMap;

/// Largest stack text kept on an error record.
pub const MAX_STACK_BYTES: usize = 4096;

/// What the host knows when a unit of work begins.
#[derive(Debug, Clone, Default)]
pub struct RequestMeta {
    pub method: String,
    pub path: String,
    pub headers: BTreeMap<String, String>,
    pub query_params: BTreeMap<String, String>,
    pub body: Option<String>,
    pub client_ip: String,
}

impl RequestMeta {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(name.into(), value.into());
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = ip.into();
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
}

/// What the host knows when a unit of work ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResponseMeta {
    pub status_code: u16,
    pub response_size: u64,
}

impl ResponseMeta {
    pub fn new(status_code: u16, response_size: u64) -> Self {
        Self {
            status_code,
            response_size,
        }
    }
}

/// Stack of the calling thread, cut to [`MAX_STACK_BYTES`].
pub(crate) fn capture_stack() -> String {
    let mut stack = Backtrace::force_capture().to_string();
    truncate_on_char_boundary(&mut stack, MAX_STACK_BYTES);
    stack
}

fn truncate_on_char_boundary(s: &mut String, max: usize) {
    if s.len() <= max {
        return;
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    s.truncate(cut);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let mut s = "aé".repeat(10);
        truncate_on_char_boundary(&mut s, 4);
        assert_eq!(s, "aéa");

        let mut short = String::from("abc");
        truncate_on_char_boundary(&mut short, 10);
        assert_eq!(short, "abc");
    }

    #[test]
    fn test_stack_is_bounded() {
        let stack = capture_stack();
        assert!(stack.len() <= MAX_STACK_BYTES);
    }

    #[test]
    fn test_request_meta_builder() {
        let meta = RequestMeta::new("GET", "/users")
            .header("Accept", "application/json")
            .query_param("page", "2")
            .client_ip("127.0.0.1");
        assert_eq!(meta.headers["Accept"], "application/json");
        assert_eq!(meta.query_params["page"], "2");
        assert!(meta.body.is_none());
    }
}
