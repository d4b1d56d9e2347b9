// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fault-injecting store wrapper.
//!
//! `FlakyStore` forwards every call to an inner [`MessageStore`] unless a
//! fault is armed for that operation, and counts calls per operation so tests
//! can assert how often the engine reached the store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fairway_core::{
    ChannelFeed, ChannelScope, ConversationId, FairwayError, HealthStatus, Message, MessageStore,
    PushChannel, Timestamp, UnreadCounts, UserId,
};

/// Store operations that can be counted and failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Health,
    Insert,
    Query,
    Subscribe,
    GetCursor,
    SetCursor,
    BatchUnread,
    ListMemberships,
    CountUnread,
}

/// How an armed operation fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// A retryable store error.
    Transient,
    /// A duplicate-key rejection.
    Conflict,
    /// Subscribe hands back a channel that never confirms. Other operations
    /// fail as [`Fault::Transient`].
    StallSubscribe,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    fault: Fault,
    /// `None` fails until healed.
    remaining: Option<u32>,
}

#[derive(Default)]
struct State {
    armed: HashMap<StoreOp, Armed>,
    calls: HashMap<StoreOp, u32>,
    stalled: Vec<ChannelFeed>,
}

pub struct FlakyStore {
    inner: Arc<dyn MessageStore>,
    state: Mutex<State>,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn MessageStore>) -> Self {
        Self {
            inner,
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fail the next `times` calls of `op`.
    pub fn fail(&self, op: StoreOp, times: u32, fault: Fault) {
        self.lock().armed.insert(
            op,
            Armed {
                fault,
                remaining: Some(times),
            },
        );
    }

    /// Fail every call of `op` until [`heal`](Self::heal).
    pub fn fail_forever(&self, op: StoreOp, fault: Fault) {
        self.lock().armed.insert(
            op,
            Armed {
                fault,
                remaining: None,
            },
        );
    }

    pub fn heal(&self, op: StoreOp) {
        self.lock().armed.remove(&op);
    }

    pub fn heal_all(&self) {
        self.lock().armed.clear();
    }

    /// Calls made for `op`, including failed ones.
    pub fn calls(&self, op: StoreOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Producer sides of channels handed out by [`Fault::StallSubscribe`].
    /// A test can drive them to confirm late or deliver early events.
    pub fn stalled_feeds(&self) -> Vec<ChannelFeed> {
        self.lock().stalled.clone()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Count the call and return the fault to inject, if any.
    fn enter(&self, op: StoreOp) -> Option<Fault> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        let armed = state.armed.get(&op).copied()?;
        let remaining = match armed.remaining {
            None => return Some(armed.fault),
            Some(0) => {
                state.armed.remove(&op);
                return None;
            }
            Some(n) => n - 1,
        };
        if remaining == 0 {
            state.armed.remove(&op);
        } else if let Some(slot) = state.armed.get_mut(&op) {
            slot.remaining = Some(remaining);
        }
        Some(armed.fault)
    }

    fn check(&self, op: StoreOp) -> Result<(), FairwayError> {
        match self.enter(op) {
            None => Ok(()),
            Some(Fault::Conflict) => Err(FairwayError::Conflict(format!("injected {op:?} conflict"))),
            Some(Fault::Transient | Fault::StallSubscribe) => {
                Err(FairwayError::store(format!("injected {op:?} failure")))
            }
        }
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn health_check(&self) -> Result<HealthStatus, FairwayError> {
        self.check(StoreOp::Health)?;
        self.inner.health_check().await
    }

    async fn insert(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message, FairwayError> {
        self.check(StoreOp::Insert)?;
        self.inner.insert(conversation, sender, body).await
    }

    async fn query_messages(
        &self,
        conversation: &ConversationId,
        limit: usize,
        after: Option<Timestamp>,
    ) -> Result<Vec<Message>, FairwayError> {
        self.check(StoreOp::Query)?;
        self.inner.query_messages(conversation, limit, after).await
    }

    async fn subscribe(&self, scope: &ChannelScope) -> Result<PushChannel, FairwayError> {
        match self.enter(StoreOp::Subscribe) {
            None => self.inner.subscribe(scope).await,
            Some(Fault::StallSubscribe) => {
                let (channel, feed) = PushChannel::pair(scope.clone());
                self.lock().stalled.push(feed);
                Ok(channel)
            }
            Some(Fault::Conflict) => Err(FairwayError::Conflict("injected subscribe conflict".into())),
            Some(Fault::Transient) => Err(FairwayError::channel(scope, "CHANNEL_ERROR")),
        }
    }

    async fn get_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<Timestamp>, FairwayError> {
        self.check(StoreOp::GetCursor)?;
        self.inner.get_last_read_cursor(user, conversation).await
    }

    async fn set_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), FairwayError> {
        self.check(StoreOp::SetCursor)?;
        self.inner.set_last_read_cursor(user, conversation, at).await
    }

    async fn batch_unread_counts(
        &self,
        user: &UserId,
        last_read: &HashMap<ConversationId, Timestamp>,
    ) -> Result<UnreadCounts, FairwayError> {
        self.check(StoreOp::BatchUnread)?;
        self.inner.batch_unread_counts(user, last_read).await
    }

    async fn list_memberships(&self, user: &UserId) -> Result<Vec<ConversationId>, FairwayError> {
        self.check(StoreOp::ListMemberships)?;
        self.inner.list_memberships(user).await
    }

    async fn count_unread(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        after: Option<Timestamp>,
    ) -> Result<u64, FairwayError> {
        self.check(StoreOp::CountUnread)?;
        self.inner.count_unread(conversation, user, after).await
    }
}
