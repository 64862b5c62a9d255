//! Ring buffer of finalized request records.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crate::observability::metrics;
use crate::record::RequestRecord;

/// Thread-safe, fixed-capacity store of the most recent requests.
#[derive(Debug)]
pub struct HistoryStore {
    records: RwLock<VecDeque<Arc<RequestRecord>>>,
    capacity: usize,
    reported: AtomicUsize,
}

impl HistoryStore {
    /// Create an empty store holding at most `capacity` records.
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(4096))),
            capacity,
            reported: AtomicUsize::new(0),
        }
    }

    /// Insert a finalized record, evicting the oldest one when full.
    pub fn add(&self, record: Arc<RequestRecord>) {
        if self.capacity == 0 {
            return;
        }
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.len() >= self.capacity {
            if let Some(evicted) = records.pop_front() {
                tracing::trace!(request_id = %evicted.id, "Evicted request from history");
            }
        }
        records.push_back(record);
        // Reported under the write lock so the gauge never trails a later write.
        self.report_len(records.len());
    }

    /// Find a record by identifier.
    pub fn get(&self, id: &str) -> Option<Arc<RequestRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.iter().find(|r| r.id == id).cloned()
    }

    /// All records, oldest first.
    pub fn all(&self) -> Vec<Arc<RequestRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        records.iter().cloned().collect()
    }

    /// The last `min(n, len)` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<Arc<RequestRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let skip = records.len().saturating_sub(n);
        records.iter().skip(skip).cloned().collect()
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.clear();
        self.report_len(0);
    }

    /// Size last exported to the history gauge.
    pub fn reported_len(&self) -> usize {
        self.reported.load(Ordering::Acquire)
    }

    fn report_len(&self, len: usize) {
        self.reported.store(len, Ordering::Release);
        metrics::record_history_size(len);
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
