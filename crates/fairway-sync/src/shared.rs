// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session-wide state shared by every conversation: the cross-conversation
//! dedup cache, badge counts and the unread aggregator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use fairway_config::model::FairwayConfig;
use fairway_core::{Clock, ConversationId, MessageId, MessageStore, Timestamp};

use crate::dedup::DedupCache;
use crate::unread::UnreadAggregator;

/// Owned explicitly and injected into the controller, so a host can keep it
/// across controller restarts or inspect it in tests.
pub struct SharedSyncState {
    seen: Mutex<DedupCache>,
    badges: Mutex<HashMap<ConversationId, u64>>,
    published_total: Mutex<Option<u64>>,
    unread: UnreadAggregator,
}

impl SharedSyncState {
    /// Fresh session state sized by `dedup.global_capacity`.
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, config: &FairwayConfig) -> Self {
        Self {
            seen: Mutex::new(DedupCache::new(config.dedup.global_capacity)),
            badges: Mutex::new(HashMap::new()),
            published_total: Mutex::new(None),
            unread: UnreadAggregator::new(store, clock, &config.unread),
        }
    }

    fn seen(&self) -> MutexGuard<'_, DedupCache> {
        self.seen.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn badges(&self) -> MutexGuard<'_, HashMap<ConversationId, u64>> {
        self.badges.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a message id for the whole session. `true` when first seen.
    pub fn remember(&self, id: &MessageId, at: Timestamp) -> bool {
        self.seen().remember(id, at)
    }

    /// Whether any path of this session already handled `id`.
    pub fn has_seen(&self, id: &MessageId) -> bool {
        self.seen().contains(id)
    }

    pub fn seen_count(&self) -> usize {
        self.seen().len()
    }

    /// Unread counts shared by every controller of the session.
    pub fn unread(&self) -> &UnreadAggregator {
        &self.unread
    }

    /// Current badge, zero when none was counted.
    pub fn badge(&self, conversation: &ConversationId) -> u64 {
        self.badges().get(conversation).copied().unwrap_or(0)
    }

    /// Count one more unread message. A conversation without a badge starts
    /// from `seed`. Returns the new count.
    pub fn increment_badge(&self, conversation: &ConversationId, seed: Option<u64>) -> u64 {
        let mut badges = self.badges();
        let count = badges
            .entry(conversation.clone())
            .or_insert_with(|| seed.unwrap_or(0));
        *count += 1;
        *count
    }

    /// Set a badge only if the conversation has none yet. Returns whether it was set.
    pub fn seed_badge(&self, conversation: &ConversationId, count: u64) -> bool {
        let mut badges = self.badges();
        if badges.contains_key(conversation) {
            return false;
        }
        badges.insert(conversation.clone(), count);
        true
    }

    /// Zero a badge. Returns whether it was non-zero before.
    pub fn clear_badge(&self, conversation: &ConversationId) -> bool {
        self.badges()
            .insert(conversation.clone(), 0)
            .is_some_and(|previous| previous > 0)
    }

    /// Drop the badge of a conversation the user left.
    pub fn forget_badge(&self, conversation: &ConversationId) {
        self.badges().remove(conversation);
    }

    /// Remember `total` as the last published value. `true` when it changed.
    pub fn note_total(&self, total: u64) -> bool {
        let mut published = self.published_total.lock().unwrap_or_else(|e| e.into_inner());
        if *published == Some(total) {
            return false;
        }
        *published = Some(total);
        true
    }
}
