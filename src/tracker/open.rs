//! A request record while its unit of work is still running.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use crate::record::types::as_millis_f64;
use crate::record::RequestRecord;
use crate::tracker::capture::ResponseMeta;

struct OpenState {
    record: RequestRecord,
    finalized: bool,
}

/// The mutable half of a request's lifecycle.
///
/// All mutation happens under one per-request lock, and the
/// `Open → Finalized` transition is guarded by the same lock so it
/// happens exactly once.
pub struct OpenRequest {
    id: String,
    started: Instant,
    state: Mutex<OpenState>,
}

impl OpenRequest {
    pub(crate) fn new(record: RequestRecord) -> Self {
        Self {
            id: record.id.clone(),
            started: Instant::now(),
            state: Mutex::new(OpenState {
                record,
                finalized: false,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_finalized(&self) -> bool {
        self.lock().finalized
    }

    fn lock(&self) -> MutexGuard<'_, OpenState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mutate the record if it is still open. Returns `None` once finalized.
    pub(crate) fn with_open<R>(&self, f: impl FnOnce(&mut RequestRecord) -> R) -> Option<R> {
        let mut state = self.lock();
        if state.finalized {
            return None;
        }
        Some(f(&mut state.record))
    }

    /// Copy of the record as it stands.
    pub(crate) fn snapshot(&self) -> RequestRecord {
        self.lock().record.clone()
    }

    /// Close the record. Only the first call returns the frozen record.
    pub(crate) fn finalize(&self, meta: &ResponseMeta) -> Option<Arc<RequestRecord>> {
        let mut state = self.lock();
        if state.finalized {
            return None;
        }
        state.finalized = true;

        let elapsed = self.started.elapsed();
        let record = &mut state.record;
        // Derived from the monotonic clock so end_time never precedes start_time.
        record.end_time = Some(
            record.start_time
                + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero()),
        );
        record.duration = elapsed;
        record.duration_ms = as_millis_f64(elapsed);
        record.status_code = meta.status_code;
        record.response_size = meta.response_size;

        Some(Arc::new(record.clone()))
    }
}

impl std::fmt::Debug for OpenRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRequest")
            .field("id", &self.id)
            .field("finalized", &self.is_finalized())
            .finish()
    }
}
