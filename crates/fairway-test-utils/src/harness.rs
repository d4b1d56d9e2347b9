// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test harness for end-to-end engine tests.
//!
//! `TestHarness` assembles a controller over an in-memory store wrapped in a
//! [`FlakyStore`], a [`ManualClock`], and a device cache in a temp directory.
//! The harness subscribes to the event bus before anything runs, so every
//! engine event is observable.

use std::sync::Arc;
use std::time::Duration;

use chrono::DateTime;
use fairway_bus::{EngineEvent, EventReceiver};
use fairway_config::model::FairwayConfig;
use fairway_core::{
    ConversationId, FairwayError, ManualClock, Message, MessageId, StaticAuth, Timestamp, UserId,
};
use fairway_store::MemoryStore;
use fairway_sync::ConversationController;

use crate::flaky::FlakyStore;

/// How long event helpers wait in real time before giving up.
const EVENT_TIMEOUT: Duration = Duration::from_secs(2);

/// Timestamp `secs` seconds after the Unix epoch.
pub fn ts(secs: i64) -> Timestamp {
    DateTime::from_timestamp(secs, 0).unwrap_or(DateTime::UNIX_EPOCH)
}

/// A message as the store would return it.
pub fn message_at(conversation: &ConversationId, id: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: MessageId::from(id),
        conversation_id: conversation.clone(),
        sender_id: UserId::from(sender),
        body: format!("body of {id}"),
        created_at: ts(secs),
        edited_at: None,
        deleted: false,
    }
}

/// Builder for creating test environments with configurable options.
pub struct TestHarnessBuilder {
    user: Option<String>,
    paused: bool,
    watchdog: bool,
    start: Timestamp,
    config: FairwayConfig,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self {
            user: Some("alice".to_string()),
            paused: false,
            watchdog: false,
            start: ts(1_700_000_000),
            config: FairwayConfig::default(),
        }
    }

    /// Sign in as `user` instead of `alice`.
    pub fn with_user(mut self, user: &str) -> Self {
        self.user = Some(user.to_string());
        self
    }

    /// Nobody signed in.
    pub fn anonymous(mut self) -> Self {
        self.user = None;
        self
    }

    /// Timers block until [`ManualClock::advance`] instead of completing at once.
    pub fn with_paused_clock(mut self) -> Self {
        self.paused = true;
        self
    }

    /// Run the link watchdog. Off by default, since its periodic sleeps would
    /// keep an auto-advancing clock moving.
    pub fn with_watchdog(mut self) -> Self {
        self.watchdog = true;
        self
    }

    /// Start time of the manual clock.
    pub fn starting_at(mut self, start: Timestamp) -> Self {
        self.start = start;
        self
    }

    /// Engine configuration. `storage.cache_path` defaults to a temp file and
    /// `watchdog.enabled` follows [`with_watchdog`](Self::with_watchdog).
    pub fn with_config(mut self, config: FairwayConfig) -> Self {
        self.config = config;
        self
    }

    pub async fn build(self) -> Result<TestHarness, FairwayError> {
        let temp_dir = tempfile::TempDir::new()
            .map_err(|e| FairwayError::Internal(format!("temp dir: {e}")))?;
        let mut config = self.config;
        config.watchdog.enabled = self.watchdog;
        if config.storage.cache_path.is_none() {
            let path = temp_dir.path().join("cache.db");
            config.storage.cache_path = Some(path.to_string_lossy().to_string());
        }

        let clock = Arc::new(if self.paused {
            ManualClock::paused(self.start)
        } else {
            ManualClock::new(self.start)
        });
        let memory = MemoryStore::new(clock.clone());
        let store = Arc::new(FlakyStore::new(Arc::new(memory.clone())));
        let auth = match &self.user {
            Some(user) => StaticAuth::signed_in(user.as_str()),
            None => StaticAuth::anonymous(),
        };

        let controller = ConversationController::builder(store.clone(), Arc::new(auth))
            .config(config.clone())
            .clock(clock.clone())
            .build()
            .await?;
        let events = controller.events();

        Ok(TestHarness {
            user: UserId::from(self.user.unwrap_or_default()),
            clock,
            memory,
            store,
            config,
            controller,
            events,
            _temp_dir: temp_dir,
        })
    }
}

/// A fully wired engine for integration tests.
pub struct TestHarness {
    pub user: UserId,
    pub clock: Arc<ManualClock>,
    /// Shares state with the store behind `store`; use it to script the server.
    pub memory: MemoryStore,
    pub store: Arc<FlakyStore>,
    pub config: FairwayConfig,
    pub controller: ConversationController,
    pub events: EventReceiver,
    _temp_dir: tempfile::TempDir,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    pub async fn new() -> Result<Self, FairwayError> {
        Self::builder().build().await
    }

    /// Direct conversation between the harness user and `other`.
    pub fn direct_with(&self, other: &str) -> Result<ConversationId, FairwayError> {
        Ok(self.memory.create_direct(&self.user, &UserId::from(other))?.id)
    }

    /// Import messages `(id, sender, secs)` into `conversation`.
    pub fn seed(
        &self,
        conversation: &ConversationId,
        messages: &[(&str, &str, i64)],
    ) -> Result<(), FairwayError> {
        for (id, sender, secs) in messages {
            self.memory.import(message_at(conversation, id, sender, *secs))?;
        }
        Ok(())
    }

    /// Let queued signals drain, then return every event published so far.
    pub async fn drain(&mut self) -> Vec<EngineEvent> {
        self.controller.settle().await;
        self.events.drain()
    }

    /// Wait for the first event matching `predicate`, skipping others.
    pub async fn wait_for(&mut self, predicate: impl Fn(&EngineEvent) -> bool) -> Option<EngineEvent> {
        let events = &mut self.events;
        tokio::time::timeout(EVENT_TIMEOUT, async {
            while let Some(envelope) = events.recv().await {
                if predicate(&envelope.event) {
                    return Some(envelope.event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }

    /// Ids of the open conversation's timeline, oldest first.
    pub fn timeline_ids(&self) -> Vec<String> {
        self.controller
            .timeline()
            .into_iter()
            .map(|m| m.id.0)
            .collect()
    }
}

/// Ids of rendered messages among `events`, in publish order.
pub fn rendered_ids(events: &[EngineEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            EngineEvent::MessageRendered { message, .. } => Some(message.id.0.clone()),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn harness_opens_a_seeded_conversation() {
        let mut h = TestHarness::new().await.unwrap();
        let room = h.direct_with("bob").unwrap();
        h.seed(&room, &[("m1", "bob", 1), ("m2", "alice", 2)]).unwrap();

        h.controller.open_conversation(&room).await.unwrap();
        assert_eq!(h.timeline_ids(), ["m1", "m2"]);
        assert_eq!(rendered_ids(&h.drain().await), ["m1", "m2"]);
        h.controller.shutdown().await;
    }
}
