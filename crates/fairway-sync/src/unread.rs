// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Unread count aggregator.
//!
//! The batched remote computation is the fast path. It sits behind a circuit
//! breaker; while the circuit is open, or when a batch call fails, counts are
//! computed room by room. Results are cached for a short TTL. Nothing here
//! returns an error: the worst case is the last known total, or zero.
//!
//! Every [`invalidate`](UnreadAggregator::invalidate) bumps an epoch. A
//! computation that started under an older epoch still returns its result,
//! but never writes it to the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use fairway_config::model::UnreadConfig;
use fairway_core::{Clock, ConversationId, FairwayError, MessageStore, Timestamp, UserId, span};
use fairway_resilience::{CircuitBreaker, CircuitSnapshot};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct Cached {
    count: u64,
    computed_at: Timestamp,
}

#[derive(Debug)]
struct State {
    total: Option<Cached>,
    per_conversation: HashMap<ConversationId, Cached>,
    last_total: Option<u64>,
    epoch: u64,
    circuit: CircuitBreaker,
}

pub struct UnreadAggregator {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: Mutex<State>,
}

impl UnreadAggregator {
    /// Aggregator with an empty cache and a closed circuit.
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, config: &UnreadConfig) -> Self {
        Self {
            store,
            clock,
            ttl: config.cache_ttl(),
            state: Mutex::new(State {
                total: None,
                per_conversation: HashMap::new(),
                last_total: None,
                epoch: 0,
                circuit: CircuitBreaker::new(
                    config.failure_threshold,
                    config.base_backoff(),
                    config.max_backoff(),
                ),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh(&self, entry: Option<&Cached>, now: Timestamp) -> Option<u64> {
        entry
            .filter(|c| now - c.computed_at < span(self.ttl))
            .map(|c| c.count)
    }

    /// Total unread across every conversation `user` belongs to.
    ///
    /// `cursors` are the caller's read cursors, keyed by conversation.
    pub async fn total_unread(&self, user: &UserId, cursors: &HashMap<ConversationId, Timestamp>) -> u64 {
        let now = self.clock.now();
        let (batch_allowed, epoch) = {
            let state = self.lock();
            if let Some(total) = self.fresh(state.total.as_ref(), now) {
                return total;
            }
            (state.circuit.allows(now), state.epoch)
        };

        if batch_allowed {
            match self.store.batch_unread_counts(user, cursors).await {
                Ok(counts) => {
                    let computed_at = self.clock.now();
                    let mut state = self.lock();
                    state.circuit.record_success();
                    if state.epoch != epoch {
                        debug!(total = counts.total, "unread total superseded by invalidation");
                        return counts.total;
                    }
                    for (conversation, count) in counts.per_conversation {
                        state
                            .per_conversation
                            .insert(conversation, Cached { count, computed_at });
                    }
                    return store_total(&mut state, counts.total, computed_at);
                }
                Err(e) => {
                    let now = self.clock.now();
                    let mut state = self.lock();
                    match state.circuit.record_failure(now) {
                        Some(window) => warn!(
                            error = %e,
                            failures = state.circuit.failures(),
                            disabled_for_ms = window.as_millis() as u64,
                            "batch unread failing, circuit open"
                        ),
                        None => warn!(
                            error = %e,
                            failures = state.circuit.failures(),
                            "batch unread failed, using per-room counts"
                        ),
                    }
                }
            }
        } else {
            debug!("batch unread circuit open, using per-room counts");
        }

        match self.per_room(user, cursors).await {
            Ok((total, rooms)) => {
                let computed_at = self.clock.now();
                let mut state = self.lock();
                if state.epoch != epoch {
                    debug!(total, "unread total superseded by invalidation");
                    return total;
                }
                for (conversation, count) in rooms {
                    state
                        .per_conversation
                        .insert(conversation, Cached { count, computed_at });
                }
                store_total(&mut state, total, computed_at)
            }
            Err(e) => {
                let last = self.lock().last_total.unwrap_or(0);
                warn!(error = %e, last_total = last, "per-room unread fallback failed");
                last
            }
        }
    }

    async fn per_room(
        &self,
        user: &UserId,
        cursors: &HashMap<ConversationId, Timestamp>,
    ) -> Result<(u64, Vec<(ConversationId, u64)>), FairwayError> {
        let memberships = self.store.list_memberships(user).await?;
        let mut total = 0;
        let mut rooms = Vec::with_capacity(memberships.len());
        for conversation in memberships {
            let count = self
                .store
                .count_unread(&conversation, user, cursors.get(&conversation).copied())
                .await?;
            total += count;
            rooms.push((conversation, count));
        }
        Ok((total, rooms))
    }

    /// Unread count for a single conversation.
    pub async fn conversation_unread(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        cursor: Option<Timestamp>,
    ) -> u64 {
        let now = self.clock.now();
        if let Some(count) = self.cached_conversation(conversation, now) {
            return count;
        }
        match self.store.count_unread(conversation, user, cursor).await {
            Ok(count) => {
                let computed_at = self.clock.now();
                self.lock()
                    .per_conversation
                    .insert(conversation.clone(), Cached { count, computed_at });
                count
            }
            Err(e) => {
                warn!(conversation = %conversation, error = %e, "unread count failed");
                self.lock()
                    .per_conversation
                    .get(conversation)
                    .map_or(0, |c| c.count)
            }
        }
    }

    /// Fresh cached count for a conversation, without touching the store.
    pub fn cached_conversation(&self, conversation: &ConversationId, now: Timestamp) -> Option<u64> {
        let state = self.lock();
        self.fresh(state.per_conversation.get(conversation), now)
    }

    /// Drop every cached count. Stale per-room entries are kept only as a
    /// last resort for failed lookups.
    pub fn invalidate(&self) {
        let mut state = self.lock();
        state.epoch += 1;
        state.total = None;
        for entry in state.per_conversation.values_mut() {
            entry.computed_at = Timestamp::MIN_UTC;
        }
    }

    /// Number of invalidations so far. A total computed while this changed
    /// predates the latest invalidation.
    pub fn epoch(&self) -> u64 {
        self.lock().epoch
    }

    /// Newest total that made it into the cache.
    pub fn last_total(&self) -> Option<u64> {
        self.lock().last_total
    }

    /// Batch circuit breaker state as of now.
    pub fn circuit(&self) -> CircuitSnapshot {
        let now = self.clock.now();
        self.lock().circuit.snapshot(now)
    }
}

fn store_total(state: &mut State, total: u64, computed_at: Timestamp) -> u64 {
    state.total = Some(Cached {
        count: total,
        computed_at,
    });
    state.last_total = Some(total);
    total
}
