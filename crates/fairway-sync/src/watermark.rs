// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Newest accepted message timestamp per conversation, the lower bound for backfill.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::TimeDelta;
use fairway_core::{Clock, ConversationId, FairwayError, Timestamp, span};
use fairway_store::LocalCache;
use tracing::warn;

pub struct Watermarks {
    local: Arc<LocalCache>,
    clock: Arc<dyn Clock>,
    default_lookback: Duration,
    marks: Mutex<HashMap<ConversationId, Timestamp>>,
}

impl Watermarks {
    /// Watermarks persisted to `local`; unknown conversations look back `default_lookback`.
    pub fn new(local: Arc<LocalCache>, clock: Arc<dyn Clock>, default_lookback: Duration) -> Self {
        Self {
            local,
            clock,
            default_lookback,
            marks: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Timestamp>> {
        self.marks.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Load watermarks persisted by a previous session.
    pub async fn warm(&self) -> Result<usize, FairwayError> {
        let stored = self.local.load_watermarks().await?;
        let count = stored.len();
        let mut marks = self.lock();
        for (conversation, at) in stored {
            let slot = marks.entry(conversation).or_insert(at);
            *slot = (*slot).max(at);
        }
        Ok(count)
    }

    /// Newest creation time observed for `conversation`.
    pub fn get(&self, conversation: &ConversationId) -> Option<Timestamp> {
        self.lock().get(conversation).copied()
    }

    /// Lower bound for the next backfill of `conversation`.
    ///
    /// One microsecond before the watermark, so a late message sharing its
    /// timestamp is still fetched. A conversation never seen looks back
    /// `default_lookback` from now.
    pub fn since(&self, conversation: &ConversationId) -> Timestamp {
        match self.get(conversation) {
            Some(at) => at - TimeDelta::microseconds(1),
            None => self.clock.now() - span(self.default_lookback),
        }
    }

    /// Record an accepted message. Only a newer timestamp moves the mark.
    pub async fn observe(&self, conversation: &ConversationId, at: Timestamp) {
        {
            let mut marks = self.lock();
            if marks.get(conversation).is_some_and(|current| *current >= at) {
                return;
            }
            marks.insert(conversation.clone(), at);
        }
        if let Err(e) = self.local.save_watermark(conversation, at).await {
            warn!(conversation = %conversation, error = %e, "failed to persist watermark");
        }
    }

    /// Drop the in-memory mark. Persisted rows go with [`ReadCursors::forget`](crate::cursor::ReadCursors::forget).
    pub fn forget(&self, conversation: &ConversationId) {
        self.lock().remove(conversation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::ManualClock;

    fn ts(secs: i64) -> Timestamp {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn unknown_conversation_looks_back_from_now() {
        let local = Arc::new(LocalCache::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(ts(100_000)));
        let marks = Watermarks::new(local, clock, Duration::from_secs(86_400));
        assert_eq!(marks.since(&ConversationId::from("room-1")), ts(13_600));
    }

    #[tokio::test]
    async fn observe_moves_forward_and_persists() {
        let local = Arc::new(LocalCache::open_in_memory().await.unwrap());
        let clock = Arc::new(ManualClock::new(ts(0)));
        let marks = Watermarks::new(local.clone(), clock.clone(), Duration::from_secs(60));
        let room = ConversationId::from("room-1");

        marks.observe(&room, ts(50)).await;
        marks.observe(&room, ts(30)).await;
        assert_eq!(marks.get(&room), Some(ts(50)));
        assert_eq!(marks.since(&room), ts(50) - TimeDelta::microseconds(1));

        let reloaded = Watermarks::new(local, clock, Duration::from_secs(60));
        assert_eq!(reloaded.warm().await.unwrap(), 1);
        assert_eq!(reloaded.get(&room), Some(ts(50)));

        reloaded.forget(&room);
        assert_eq!(reloaded.since(&room), ts(-60));
    }
}
