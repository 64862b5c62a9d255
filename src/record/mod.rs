//! Telemetry record definitions.
//!
//! # Data Flow
//! ```text
//! tracker begins a unit of work
//!     → RequestRecord (open, mutable behind the per-request lock)
//!     → QueryRecord / ErrorRecord appended as they occur
//!     → RequestRecord finalized, frozen into Arc<RequestRecord>
//!
//! Every transition is wrapped in an Event for the broadcast hub.
//! ```
//!
//! # Design Decisions
//! - Records are plain data; all synchronization lives in `tracker`
//! - Finalized records are shared as `Arc<RequestRecord>` and never mutated
//! - JSON field names match what dashboard clients already consume

pub mod event;
pub mod types;

pub use event::Event;
pub use types::{ErrorRecord, QueryRecord, RequestRecord, Severity};
