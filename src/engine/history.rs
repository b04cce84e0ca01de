//! Bounded history of finished passes

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::SyncResult;

/// Fixed-capacity, append-only pass history; the oldest entry is evicted first
#[derive(Debug)]
pub struct SyncHistory {
    capacity: usize,
    entries: Mutex<VecDeque<SyncResult>>,
}

impl SyncHistory {
    /// History holding at most `capacity` results (at least one)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<SyncResult>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a finished result
    pub fn push(&self, result: SyncResult) {
        let mut entries = self.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(result);
    }

    /// The `limit` most recent results, oldest first
    pub fn recent(&self, limit: usize) -> Vec<SyncResult> {
        let entries = self.lock();
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    /// Number of retained results
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Maximum number of retained results
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
