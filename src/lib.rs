//! Request correlation and live broadcast for web applications.
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                  DEBUG BAR                   │
//!   HTTP request       │  ┌────────────┐     ┌──────────────────────┐ │
//!   ───────────────────┼─▶│ hooks::http│────▶│ tracker::DebugBar    │ │
//!                      │  └─────┬──────┘     │  begin / attach_* /  │ │
//!                      │        │ Carrier    │  finish              │ │
//!                      │        ▼            └───┬─────────┬────────┘ │
//!                      │  ┌────────────┐         │         │          │
//!   data layer  ───────┼─▶│ hooks::data│─────────┘         │          │
//!                      │  └────────────┘                   ▼          │
//!                      │                 ┌─────────┐  ┌──────────┐    │
//!                      │                 │ history │  │broadcast │    │
//!                      │                 │  store  │  │   hub    │    │
//!                      │                 └────┬────┘  └────┬─────┘    │
//!                      │                      ▼            ▼          │
//!                      │                 ┌────────────────────────┐   │
//!   dashboards  ◀──────┼─────────────────│ transport (ws + api)   │   │
//!                      │                 └────────────────────────┘   │
//!                      └──────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let bar = DebugBar::new(DebugBarConfig::default());
//! bar.start()?;
//!
//! let app = hooks::instrument(Router::new().route("/", get(index)), bar.clone())
//!     .merge(bar.routes());
//! ```

// Data
pub mod record;

// Core subsystems
pub mod broadcast;
pub mod context;
pub mod history;
pub mod tracker;

// Integration
pub mod hooks;
pub mod transport;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use broadcast::{BroadcastHub, HubError, Observer, ObserverId};
pub use config::{AppConfig, DebugBarConfig};
pub use context::Carrier;
pub use hooks::{QueryOutcome, QueryToken};
pub use lifecycle::Shutdown;
pub use record::{ErrorRecord, Event, QueryRecord, RequestRecord, Severity};
pub use tracker::{DebugBar, RequestMeta, ResponseMeta};
