//! Request lifecycle orchestration.
//!
//! # Data Flow
//! ```text
//! begin(meta)
//!     → RequestRecord opened, bound to a fresh Carrier
//!     → RequestStarted broadcast (only if observers exist)
//!
//! attach_query / attach_error (any task holding the Carrier)
//!     → appended under the per-request lock
//!     → Query / Error broadcast while still holding it, so observers
//!       see sub-events in stored order
//!
//! finish(meta)
//!     → Open → Finalized exactly once
//!     → HistoryStore::add
//!     → RequestEnded broadcast
//! ```
//!
//! # Design Decisions
//! - Capture never fails the host: problems are counted and logged
//! - Records stop accepting data once finalized
//! - Disabled tracking hands out detached carriers, so every hook is a no-op

mod capture;
mod debugbar;
mod open;

pub use capture::{RequestMeta, ResponseMeta, MAX_STACK_BYTES};
pub use debugbar::DebugBar;
pub use open::OpenRequest;
