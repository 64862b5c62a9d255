//! Publish/subscribe fan-out of lifecycle events.
//!
//! # Data Flow
//! ```text
//! producers (request path, query capture, error capture)
//!     → publish(): stamp sequence number, try_send to bounded inbound queue
//!     → dispatch loop (single task, started once via run())
//!     → per-observer bounded queue (try_send)
//!     → Observer::recv() in the transport task
//! ```
//!
//! # Design Decisions
//! - `publish` never awaits and never blocks: a full inbound queue drops
//!   the event and counts it
//! - Each observer has its own queue; when it is full the event is
//!   dropped for that observer only and its missed counter grows
//! - Observers only see events whose sequence number is at or after
//!   their subscription point, so nothing is replayed
//! - The observer set lives in a `DashMap`, independent of request and
//!   history locks

pub mod hub;
pub mod observer;

pub use hub::{BroadcastHub, HubError};
pub use observer::{Observer, ObserverId};
