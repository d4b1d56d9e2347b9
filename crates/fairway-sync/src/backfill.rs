// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adaptive-interval catch-up fetcher.
//!
//! Each scope has its own in-flight flag and last-run time. Overlapping calls
//! for a scope collapse into the one already running, and a scope that ran
//! recently is throttled according to the app's visibility. Pull-to-refresh
//! skips the throttle but never the in-flight guard.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::TimeDelta;
use fairway_config::model::BackfillConfig;
use fairway_core::{
    BackfillReason, ChannelScope, Clock, ConversationId, FairwayError, Message, MessageStore,
    Timestamp, Visibility,
};
use tracing::{debug, info, warn};

/// Result of a [`BackfillScheduler::maybe_backfill`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackfillOutcome {
    /// Another backfill for the scope was already running.
    Skipped,
    /// The scope ran too recently for the current visibility.
    Throttled { retry_in: Duration },
    /// Messages fetched, oldest first, without repeated ids.
    Completed(Vec<Message>),
}

impl BackfillOutcome {
    /// Fetched messages; empty unless the run completed.
    pub fn messages(&self) -> &[Message] {
        match self {
            BackfillOutcome::Completed(messages) => messages,
            _ => &[],
        }
    }
}

#[derive(Debug, Default)]
struct ScopeState {
    in_flight: bool,
    last_run: Option<Timestamp>,
}

#[derive(Debug)]
struct State {
    visibility: Visibility,
    scopes: HashMap<ChannelScope, ScopeState>,
}

pub struct BackfillScheduler {
    store: Arc<dyn MessageStore>,
    clock: Arc<dyn Clock>,
    foreground_interval: Duration,
    background_interval: Duration,
    page_size: usize,
    max_pages: usize,
    state: Mutex<State>,
}

/// Clears the in-flight flag and stamps the last run, however the fetch ends.
struct InFlight<'a> {
    scheduler: &'a BackfillScheduler,
    scope: ChannelScope,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let now = self.scheduler.clock.now();
        let mut state = self.scheduler.lock();
        let entry = state.scopes.entry(self.scope.clone()).or_default();
        entry.in_flight = false;
        entry.last_run = Some(now);
    }
}

impl BackfillScheduler {
    /// Scheduler starting in the foreground with no scope run yet.
    pub fn new(store: Arc<dyn MessageStore>, clock: Arc<dyn Clock>, config: &BackfillConfig) -> Self {
        Self {
            store,
            clock,
            foreground_interval: config.foreground_min_interval(),
            background_interval: config.background_min_interval(),
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            state: Mutex::new(State {
                visibility: Visibility::Foreground,
                scopes: HashMap::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a visibility change. Returns the previous value.
    pub fn set_visibility(&self, visibility: Visibility) -> Visibility {
        std::mem::replace(&mut self.lock().visibility, visibility)
    }

    /// Visibility the throttle currently applies.
    pub fn visibility(&self) -> Visibility {
        self.lock().visibility
    }

    /// Minimum spacing between runs of one scope right now.
    pub fn min_interval(&self) -> Duration {
        match self.visibility() {
            Visibility::Foreground => self.foreground_interval,
            Visibility::Background => self.background_interval,
        }
    }

    #[cfg(test)]
    fn is_in_flight(&self, scope: &ChannelScope) -> bool {
        self.lock().scopes.get(scope).is_some_and(|s| s.in_flight)
    }

    /// Catch up `scope` by fetching messages created after each target's
    /// last-seen timestamp.
    ///
    /// A conversation scope passes its own conversation as the single target;
    /// the global scope passes every membership.
    pub async fn maybe_backfill(
        &self,
        scope: &ChannelScope,
        targets: Vec<(ConversationId, Timestamp)>,
        reason: BackfillReason,
    ) -> Result<BackfillOutcome, FairwayError> {
        let _guard = match self.acquire(scope, reason) {
            Ok(guard) => guard,
            Err(outcome) => {
                debug!(%scope, %reason, ?outcome, "backfill not started");
                return Ok(outcome);
            }
        };

        let mut fetched = Vec::new();
        let mut seen = HashSet::new();
        let mut last_error = None;
        let mut failures = 0usize;

        for (conversation, last_seen) in &targets {
            match self.fetch_since(conversation, *last_seen).await {
                Ok(messages) => {
                    fetched.extend(messages.into_iter().filter(|m| seen.insert(m.id.clone())));
                }
                Err(e) => {
                    warn!(%scope, conversation = %conversation, error = %e, "backfill query failed");
                    failures += 1;
                    last_error = Some(e);
                }
            }
        }

        if failures > 0 && failures == targets.len()
            && let Some(e) = last_error
        {
            return Err(e);
        }

        fetched.sort_by_key(Message::order_key);
        if fetched.is_empty() {
            debug!(%scope, %reason, "backfill found nothing new");
        } else {
            info!(%scope, %reason, count = fetched.len(), "backfill fetched messages");
        }
        Ok(BackfillOutcome::Completed(fetched))
    }

    fn acquire(&self, scope: &ChannelScope, reason: BackfillReason) -> Result<InFlight<'_>, BackfillOutcome> {
        let now = self.clock.now();
        let min_interval = self.min_interval();
        let mut state = self.lock();
        let entry = state.scopes.entry(scope.clone()).or_default();

        if entry.in_flight {
            return Err(BackfillOutcome::Skipped);
        }
        if reason != BackfillReason::PullToRefresh
            && let Some(last_run) = entry.last_run
        {
            let elapsed = (now - last_run).to_std().unwrap_or(Duration::ZERO);
            if elapsed < min_interval {
                return Err(BackfillOutcome::Throttled {
                    retry_in: min_interval - elapsed,
                });
            }
        }

        entry.in_flight = true;
        Ok(InFlight {
            scheduler: self,
            scope: scope.clone(),
        })
    }

    /// Page through `conversation` from `after`, without throttling.
    ///
    /// Each page starts one microsecond before the previous page's newest
    /// timestamp so messages sharing that timestamp are not skipped. A full
    /// page that brought nothing new, or that holds a single timestamp, is
    /// stuck inside a run of equal timestamps: the same query is repeated
    /// with twice the limit until the run fits. Repeats are dropped here and
    /// by the dedup caches.
    pub async fn fetch_since(
        &self,
        conversation: &ConversationId,
        after: Timestamp,
    ) -> Result<Vec<Message>, FairwayError> {
        let mut after = after;
        let mut limit = self.page_size;
        let mut seen = HashSet::new();
        let mut messages = Vec::new();

        for page_number in 0..self.max_pages {
            let page = self
                .store
                .query_messages(conversation, limit, Some(after))
                .await?;
            let full = page.len() >= limit;
            let (Some(oldest), Some(newest)) = (
                page.first().map(|m| m.created_at),
                page.last().map(|m| m.created_at),
            ) else {
                break;
            };
            let before = messages.len();
            messages.extend(page.into_iter().filter(|m| seen.insert(m.id.clone())));

            if !full {
                break;
            }
            if page_number + 1 == self.max_pages {
                debug!(conversation = %conversation, pages = self.max_pages, "backfill page limit reached");
            }
            if oldest == newest || messages.len() == before {
                limit = limit.saturating_mul(2);
            } else {
                after = newest - TimeDelta::microseconds(1);
                limit = self.page_size;
            }
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::{ManualClock, MessageId, UserId};
    use fairway_store::MemoryStore;

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn message(room: &ConversationId, id: &str, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: room.clone(),
            sender_id: UserId::from("bob"),
            body: id.to_string(),
            created_at: ts(secs),
            edited_at: None,
            deleted: false,
        }
    }

    struct Fixture {
        memory: MemoryStore,
        clock: Arc<ManualClock>,
        room: ConversationId,
        scheduler: BackfillScheduler,
    }

    fn fixture(config: BackfillConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(ts(1_000)));
        let memory = MemoryStore::new(clock.clone());
        let room = memory
            .create_direct(&UserId::from("alice"), &UserId::from("bob"))
            .unwrap()
            .id;
        let scheduler = BackfillScheduler::new(Arc::new(memory.clone()), clock.clone(), &config);
        Fixture {
            memory,
            clock,
            room,
            scheduler,
        }
    }

    fn ids(outcome: &BackfillOutcome) -> Vec<&str> {
        outcome.messages().iter().map(|m| m.id.as_str()).collect()
    }

    #[tokio::test]
    async fn fetches_only_newer_messages() {
        let f = fixture(BackfillConfig::default());
        for (id, secs) in [("a", 1), ("b", 2), ("c", 3)] {
            f.memory.import(message(&f.room, id, secs)).unwrap();
        }
        let scope = ChannelScope::from(f.room.clone());
        let outcome = f
            .scheduler
            .maybe_backfill(&scope, vec![(f.room.clone(), ts(1))], BackfillReason::Reconnected)
            .await
            .unwrap();
        assert_eq!(ids(&outcome), ["b", "c"]);
    }

    #[tokio::test]
    async fn pages_keep_ties_at_page_boundaries() {
        let f = fixture(BackfillConfig {
            page_size: 2,
            ..BackfillConfig::default()
        });
        for (id, secs) in [("a", 1), ("b", 2), ("c", 2), ("d", 3), ("e", 4)] {
            f.memory.import(message(&f.room, id, secs)).unwrap();
        }
        let messages = f.scheduler.fetch_since(&f.room, ts(0)).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d", "e"]);
    }

    #[tokio::test]
    async fn equal_timestamps_beyond_a_page_are_all_fetched() {
        let f = fixture(BackfillConfig {
            page_size: 2,
            ..BackfillConfig::default()
        });
        for (id, secs) in [("a", 1), ("b", 2), ("c", 2), ("d", 2)] {
            f.memory.import(message(&f.room, id, secs)).unwrap();
        }
        let messages = f.scheduler.fetch_since(&f.room, ts(0)).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn single_message_pages_walk_through_ties() {
        let f = fixture(BackfillConfig {
            page_size: 1,
            max_pages: 10,
            ..BackfillConfig::default()
        });
        for (id, secs) in [("a", 1), ("b", 2), ("c", 2), ("d", 3)] {
            f.memory.import(message(&f.room, id, secs)).unwrap();
        }
        let messages = f.scheduler.fetch_since(&f.room, ts(0)).await.unwrap();
        let ids: Vec<_> = messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn page_limit_bounds_the_fetch() {
        let f = fixture(BackfillConfig {
            page_size: 1,
            max_pages: 2,
            ..BackfillConfig::default()
        });
        for (id, secs) in [("a", 1), ("b", 2), ("c", 3)] {
            f.memory.import(message(&f.room, id, secs)).unwrap();
        }
        let messages = f.scheduler.fetch_since(&f.room, ts(0)).await.unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn background_runs_are_throttled() {
        let f = fixture(BackfillConfig::default());
        let scope = ChannelScope::from(f.room.clone());
        let targets = || vec![(f.room.clone(), ts(0))];

        assert_eq!(f.scheduler.set_visibility(Visibility::Background), Visibility::Foreground);
        let first = f
            .scheduler
            .maybe_backfill(&scope, targets(), BackfillReason::Polling)
            .await
            .unwrap();
        assert!(matches!(first, BackfillOutcome::Completed(_)));

        f.clock.advance(Duration::from_secs(3));
        let second = f
            .scheduler
            .maybe_backfill(&scope, targets(), BackfillReason::Polling)
            .await
            .unwrap();
        assert_eq!(
            second,
            BackfillOutcome::Throttled {
                retry_in: Duration::from_secs(5)
            }
        );

        let forced = f
            .scheduler
            .maybe_backfill(&scope, targets(), BackfillReason::PullToRefresh)
            .await
            .unwrap();
        assert!(matches!(forced, BackfillOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn foreground_is_not_throttled_by_default() {
        let f = fixture(BackfillConfig::default());
        let scope = ChannelScope::from(f.room.clone());
        for _ in 0..3 {
            let outcome = f
                .scheduler
                .maybe_backfill(&scope, vec![(f.room.clone(), ts(0))], BackfillReason::Foreground)
                .await
                .unwrap();
            assert!(matches!(outcome, BackfillOutcome::Completed(_)));
        }
    }

    #[tokio::test]
    async fn overlapping_call_is_skipped() {
        let f = fixture(BackfillConfig::default());
        let scope = ChannelScope::from(f.room.clone());

        let guard = f.scheduler.acquire(&scope, BackfillReason::Reconnected).unwrap();
        assert!(f.scheduler.is_in_flight(&scope));
        let outcome = f
            .scheduler
            .maybe_backfill(&scope, vec![(f.room.clone(), ts(0))], BackfillReason::Reconnected)
            .await
            .unwrap();
        assert_eq!(outcome, BackfillOutcome::Skipped);

        drop(guard);
        assert!(!f.scheduler.is_in_flight(&scope));
    }

    #[tokio::test]
    async fn failure_releases_the_guard() {
        let f = fixture(BackfillConfig::default());
        let missing = ConversationId::from("no-such-room");
        let scope = ChannelScope::from(missing.clone());

        let result = f
            .scheduler
            .maybe_backfill(&scope, vec![(missing, ts(0))], BackfillReason::Foreground)
            .await;
        assert!(result.is_err());
        assert!(!f.scheduler.is_in_flight(&scope));
    }

    #[tokio::test]
    async fn global_scope_merges_rooms_and_survives_partial_failure() {
        let f = fixture(BackfillConfig::default());
        let other = f
            .memory
            .create_direct(&UserId::from("alice"), &UserId::from("carol"))
            .unwrap()
            .id;
        f.memory.import(message(&f.room, "a", 5)).unwrap();
        f.memory.import(message(&other, "b", 3)).unwrap();

        let outcome = f
            .scheduler
            .maybe_backfill(
                &ChannelScope::Global,
                vec![
                    (f.room.clone(), ts(0)),
                    (other, ts(0)),
                    (ConversationId::from("gone"), ts(0)),
                ],
                BackfillReason::Polling,
            )
            .await
            .unwrap();
        assert_eq!(ids(&outcome), ["b", "a"]);
    }
}
