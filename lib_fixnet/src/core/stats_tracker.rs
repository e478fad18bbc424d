//! Tracks which keys need their rate statistics refreshed by a pull report,
//! and which keys get them pushed and must never be polled.

use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, PoisonError};

#[derive(Default)]
struct Dirty {
    order: VecDeque<String>,
    members: HashSet<String>,
}

#[derive(Default)]
pub struct StatsTracker {
    dirty: Mutex<Dirty>,
    push_driven: Mutex<HashSet<String>>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `key` for a pull refresh unless it is push driven or already queued.
    pub fn mark_dirty(&self, key: &str) {
        if self.is_push_driven(key) {
            return;
        }
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        if dirty.members.insert(key.to_string()) {
            dirty.order.push_back(key.to_string());
        }
    }

    pub fn discard(&self, key: &str) {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        if dirty.members.remove(key) {
            dirty.order.retain(|k| k != key);
        }
    }

    /// Removes and returns up to `max` dirty keys, oldest first.
    pub fn take_batch(&self, max: usize) -> Vec<String> {
        let mut dirty = self.dirty.lock().unwrap_or_else(PoisonError::into_inner);
        let n = max.min(dirty.order.len());
        let batch: Vec<String> = dirty.order.drain(..n).collect();
        for key in &batch {
            dirty.members.remove(key);
        }
        batch
    }

    /// Marks `key` push driven. Returns `true` the first time.
    pub fn mark_push_driven(&self, key: &str) -> bool {
        let first = self
            .push_driven
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string());
        if first {
            self.discard(key);
        }
        first
    }

    pub fn is_push_driven(&self, key: &str) -> bool {
        self.push_driven
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    pub fn dirty_len(&self) -> usize {
        self.dirty
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    /// Forgets everything; called when the mirror is torn down.
    pub fn clear(&self) {
        *self.dirty.lock().unwrap_or_else(PoisonError::into_inner) = Dirty::default();
        self.push_driven
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
