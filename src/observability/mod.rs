//! Observability of the debug bar itself.
//!
//! # Data Flow
//! ```text
//! tracker / history / broadcast / transport
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout via tracing-subscriber
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Telemetry about telemetry stays cheap: atomic increments only
//! - Capture failures are counted here instead of surfacing to the host

pub mod logging;
pub mod metrics;
