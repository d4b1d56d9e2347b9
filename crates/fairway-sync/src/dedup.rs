// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Bounded recency-ordered set of seen message identifiers.
//!
//! A hash index maps each id to its recency tick; an ordered map from tick to
//! id gives the least recently seen entry in `O(log n)`. Every `remember`
//! takes a fresh tick, so ticks are unique and the ordered map is exact.

use std::collections::{BTreeMap, HashMap};

use fairway_core::{MessageId, Timestamp};

#[derive(Debug, Clone, Copy)]
struct Seen {
    tick: u64,
    at: Timestamp,
}

/// Strict-LRU cache of message ids with their last-seen wall-clock time.
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    next_tick: u64,
    entries: HashMap<MessageId, Seen>,
    recency: BTreeMap<u64, MessageId>,
}

impl DedupCache {
    /// A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            next_tick: 0,
            entries: HashMap::with_capacity(capacity),
            recency: BTreeMap::new(),
        }
    }

    /// Record `id` as seen at `at`. Returns `true` if it was not already present.
    ///
    /// A repeat refreshes recency. Inserting past capacity evicts the single
    /// least recently seen entry.
    pub fn remember(&mut self, id: &MessageId, at: Timestamp) -> bool {
        let tick = self.next_tick;
        self.next_tick += 1;

        if let Some(seen) = self.entries.get_mut(id) {
            self.recency.remove(&seen.tick);
            seen.tick = tick;
            seen.at = at;
            self.recency.insert(tick, id.clone());
            return false;
        }

        self.entries.insert(id.clone(), Seen { tick, at });
        self.recency.insert(tick, id.clone());

        if self.entries.len() > self.capacity
            && let Some((_, evicted)) = self.recency.pop_first()
        {
            self.entries.remove(&evicted);
        }
        true
    }

    /// Membership check that leaves recency untouched.
    pub fn contains(&self, id: &MessageId) -> bool {
        self.entries.contains_key(id)
    }

    /// When `id` was last remembered.
    #[cfg(test)]
    fn last_seen(&self, id: &MessageId) -> Option<Timestamp> {
        self.entries.get(id).map(|seen| seen.at)
    }

    /// Forget every id.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most ids held before the least recent is evicted.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
