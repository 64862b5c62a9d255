//! The propagation token threaded through a unit of work.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

use crate::tracker::OpenRequest;

tokio::task_local! {
    static CURRENT: Carrier;
}

/// Errors raised while binding a carrier.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("carrier already bound to request {0}")]
    AlreadyBound(String),
}

/// Opaque token locating the request record of the current call chain.
///
/// Cloning is cheap and every clone observes the same binding.
#[derive(Clone, Default)]
pub struct Carrier {
    slot: Arc<OnceLock<Arc<OpenRequest>>>,
}

impl Carrier {
    /// Create an unbound carrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// A carrier with no tracked parent, e.g. for background jobs.
    /// Everything reported through it is dropped.
    pub fn detached() -> Self {
        Self::default()
    }

    /// Associate this carrier with an open request.
    pub fn bind(&self, request: Arc<OpenRequest>) -> Result<(), ContextError> {
        self.slot.set(request).map_err(|rejected| {
            let existing = self
                .slot
                .get()
                .map(|r| r.id().to_string())
                .unwrap_or_else(|| rejected.id().to_string());
            ContextError::AlreadyBound(existing)
        })
    }

    /// The request bound to this carrier, if any.
    pub fn lookup(&self) -> Option<Arc<OpenRequest>> {
        self.slot.get().cloned()
    }

    pub fn is_bound(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Identifier of the bound request.
    pub fn request_id(&self) -> Option<&str> {
        self.slot.get().map(|r| r.id())
    }

    /// Run `fut` with this carrier installed as the task's ambient carrier.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The ambient carrier of the running task, or a detached one.
    pub fn current() -> Carrier {
        CURRENT.try_with(Carrier::clone).unwrap_or_default()
    }
}

impl fmt::Debug for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Carrier")
            .field("request_id", &self.request_id())
            .finish()
    }
}
