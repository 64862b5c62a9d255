//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging/metrics → Start hub → Serve
//!
//! Shutdown (shutdown.rs):
//!     Ctrl+C or trigger() → hub loop exits → server drains → exit
//! ```
//!
//! # Design Decisions
//! - Fail fast: a hub that cannot start is a startup error
//! - One broadcast signal fans out to every long-running task

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
