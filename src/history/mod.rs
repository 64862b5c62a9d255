//! Bounded history of finalized requests.
//!
//! # Design Decisions
//! - Fixed capacity; the single oldest record is evicted per insert once
//!   full (strict FIFO, no batching)
//! - One `RwLock` over the ring: dashboards read concurrently, finalizers
//!   write exclusively
//! - Accessors hand out `Arc` snapshots of immutable records, so no lock
//!   is held while callers iterate

pub mod store;

pub use store::HistoryStore;
