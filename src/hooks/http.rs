//! Axum integration: request tracking, carrier extraction and panic recovery.

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    Router,
};
use futures_util::FutureExt;
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde_json::Value;
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::context::Carrier;
use crate::record::Severity;
use crate::tracker::{DebugBar, RequestMeta, ResponseMeta};

/// Wrap `router` with request tracking and panic recovery.
///
/// Panic recovery sits inside tracking so a panicking handler still
/// produces a finished record with status 500.
pub fn instrument<S>(router: Router<S>, bar: DebugBar) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(middleware::from_fn_with_state(bar.clone(), recover_panics))
        .layer(middleware::from_fn_with_state(bar, track_requests))
}

/// Open a record for every request and finalize it when the response body
/// has been fully written (or dropped).
pub async fn track_requests(State(bar): State<DebugBar>, req: Request, next: Next) -> Response {
    let config = bar.config();
    if !bar.is_enabled() || config.is_internal_path(req.uri().path()) {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let mut meta = RequestMeta::new(parts.method.as_str(), parts.uri.path());
    meta.headers = first_values(&parts.headers);
    if let Some(query) = parts.uri.query() {
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            meta.query_params
                .entry(key.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
    meta.client_ip = client_ip(&parts);

    let body = if config.capture_request_body && body_fits(&body, config.max_body_size) {
        match axum::body::to_bytes(body, config.max_body_size).await {
            Ok(bytes) => {
                meta.body = Some(String::from_utf8_lossy(&bytes).into_owned());
                Body::from(bytes)
            }
            Err(e) => {
                // The stream is consumed; the handler sees an empty body.
                bar.record_capture_failure("request_body");
                tracing::warn!(error = %e, path = %parts.uri.path(), "Failed to read request body for capture");
                Body::empty()
            }
        }
    } else {
        body
    };

    let carrier = bar.begin(meta);
    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(carrier.clone());

    let response = carrier.clone().scope(next.run(req)).await;

    let (parts, body) = response.into_parts();
    let metered = MeteredBody {
        inner: body,
        bar,
        carrier,
        status: parts.status.as_u16(),
        bytes: 0,
        done: false,
    };
    Response::from_parts(parts, Body::new(metered))
}

/// Turn a handler panic into a 500 and an exception on the request record.
pub async fn recover_panics(State(bar): State<DebugBar>, req: Request, next: Next) -> Response {
    let carrier = req.extensions().get::<Carrier>().cloned().unwrap_or_default();

    match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(panic = %message, request_id = ?carrier.request_id(), "Handler panicked");

            let mut context = BTreeMap::new();
            context.insert("panic".to_string(), Value::Bool(true));
            bar.on_log_event(&carrier, Severity::Exception, message, context);

            (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
        }
    }
}

/// Handlers take the request's carrier as an argument.
///
/// Falls back to the ambient task carrier, then to a detached one, so the
/// extractor never rejects.
impl<S> FromRequestParts<S> for Carrier
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<Carrier>()
            .cloned()
            .unwrap_or_else(Carrier::current))
    }
}

fn first_values(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for (name, value) in headers {
        out.entry(name.as_str().to_string())
            .or_insert_with(|| String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    out
}

/// Forwarded address first, then the socket peer.
fn client_ip(parts: &Parts) -> String {
    let forwarded = parts
        .headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real = parts
        .headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    if let Some(ip) = real {
        return ip.to_string();
    }

    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

/// Only bodies whose size is known up front and within `max` are captured.
fn body_fits(body: &Body, max: usize) -> bool {
    let hint = body.size_hint();
    match hint.upper() {
        Some(upper) => upper > 0 && upper <= max as u64,
        None => false,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Response body that counts the bytes it yields and finishes the request
/// record at end of stream, on error or when dropped.
struct MeteredBody {
    inner: Body,
    bar: DebugBar,
    carrier: Carrier,
    status: u16,
    bytes: u64,
    done: bool,
}

impl MeteredBody {
    fn complete(&mut self) {
        if self.done {
            return;
        }
        self.done = true;
        self.bar
            .finish(&self.carrier, ResponseMeta::new(self.status, self.bytes));
    }
}

impl HttpBody for MeteredBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        match &polled {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.bytes += data.len() as u64;
                }
            }
            Poll::Ready(Some(Err(_))) | Poll::Ready(None) => this.complete(),
            Poll::Pending => {}
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for MeteredBody {
    fn drop(&mut self) {
        self.complete();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_first_header_value_wins() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("x-trace", HeaderValue::from_static("abc"));

        let captured = first_values(&headers);
        assert_eq!(captured["accept"], "text/html");
        assert_eq!(captured["x-trace"], "abc");
    }

    #[test]
    fn test_client_ip_prefers_forwarded() {
        let req = axum::http::Request::builder()
            .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
            .body(())
            .unwrap();
        let (mut parts, _) = req.into_parts();
        parts
            .extensions
            .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 4000))));
        assert_eq!(client_ip(&parts), "203.0.113.9");

        parts.headers.remove("x-forwarded-for");
        assert_eq!(client_ip(&parts), "127.0.0.1");
    }

    #[test]
    fn test_body_fits() {
        assert!(body_fits(&Body::from("hello"), 16));
        assert!(!body_fits(&Body::from("hello"), 4));
        assert!(!body_fits(&Body::empty(), 16));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "handler panicked");
    }
}
