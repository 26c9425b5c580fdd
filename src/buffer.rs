// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded buffer of recently delivered events.
//!
//! The buffer is the sole deduplication authority: an event whose `seq` is
//! already present is rejected without mutating anything. Entries are kept
//! ordered by `seq`, and insertion beyond the capacity evicts the lowest `seq`.
//!
//! Eviction never affects the cursor. An evicted event has already advanced
//! it.

use crate::event::Event;
use std::collections::BTreeMap;

/// Default number of events retained.
pub const DEFAULT_CAPACITY: usize = 100;

/// Ordered, size-bounded, seq-deduplicated event collection.
#[derive(Debug, Clone)]
pub struct EventBuffer {
    entries: BTreeMap<u64, Event>,
    capacity: usize,
}

impl Default for EventBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventBuffer {
    /// Create an empty buffer. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Insert an event.
    ///
    /// Returns `false` (and does nothing) if an event with the same `seq`
    /// is already buffered.
    pub fn insert(&mut self, event: Event) -> bool {
        if self.entries.contains_key(&event.seq) {
            return false;
        }

        self.entries.insert(event.seq, event);

        while self.entries.len() > self.capacity {
            self.entries.pop_first();
        }
        true
    }

    /// Remove the event with the given `seq`, if buffered.
    pub(crate) fn remove(&mut self, seq: u64) -> Option<Event> {
        self.entries.remove(&seq)
    }

    /// Check whether an event with this `seq` is buffered.
    pub fn contains(&self, seq: u64) -> bool {
        self.entries.contains_key(&seq)
    }

    /// Empty the buffer unconditionally.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Snapshot of the buffered events, highest `seq` first.
    pub fn to_ordered_list(&self) -> Vec<Event> {
        self.entries.values().rev().cloned().collect()
    }

    /// Buffered seqs, highest first.
    pub fn seqs(&self) -> Vec<u64> {
        self.entries.keys().rev().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
