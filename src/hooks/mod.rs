//! Host integration points.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → track_requests (begin, carrier into extensions + task scope)
//!     → recover_panics
//!     → handler (Carrier extractor)
//!         → data layer: on_operation_start / on_operation_end
//!         → DebugBar::log_* for faults
//!     → MeteredBody counts response bytes
//!     → end of body or drop → DebugBar::finish
//! ```
//!
//! # Design Decisions
//! - The record is finished when the body completes, so the size is exact
//! - Debug bar endpoints are never tracked
//! - Bodies are only captured when their length is known and small enough

pub mod data;
pub mod http;

pub use data::{QueryOutcome, QueryToken};
pub use http::{instrument, recover_panics, track_requests};
