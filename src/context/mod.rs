//! Request correlation.
//!
//! # Data Flow
//! ```text
//! tracker::begin
//!     → Carrier::bind (exactly once per unit of work)
//!     → carrier travels with the request (extensions, task-local scope,
//!       or as an explicit argument)
//!     → query/error capture sites call Carrier::lookup
//!     → Some(open request) → append under the request's own lock
//!     → None → the sub-event is dropped
//! ```
//!
//! # Design Decisions
//! - Correlation follows the logical call chain, never the OS thread:
//!   tokio may resume a request on any worker
//! - Clones of a carrier share one binding slot, so child scopes see the
//!   parent's request
//! - Lookup never fails loudly; absence is a normal outcome

pub mod carrier;

pub use carrier::{Carrier, ContextError};
