// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-memory implementation of the [`MessageStore`] contract.
//!
//! Behaves like the hosted backend as far as the engine can observe:
//! server-assigned ids and timestamps, push channels that confirm with
//! `pending -> active`, insert/update fan-out, read cursors and unread counts.
//! Used by the `simulate` command and throughout the test suites.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use fairway_core::{
    ChannelFeed, ChannelScope, ChannelSignal, Clock, ConnectivityState, Conversation,
    ConversationId, ConversationKind, FairwayError, HealthStatus, MembershipStatus, Message,
    MessageEvent, MessageId, MessageStore, PushChannel, SystemClock, Timestamp, UnreadCounts,
    UserId,
};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    /// Per conversation, keyed by `(created_at, id)` so iteration is render order.
    messages: HashMap<ConversationId, BTreeMap<(Timestamp, MessageId), Message>>,
    message_index: HashMap<MessageId, (Timestamp, ConversationId)>,
    cursors: HashMap<(UserId, ConversationId), Timestamp>,
    feeds: Vec<ChannelFeed>,
    next_message: u64,
}

impl State {
    fn conversation(&self, id: &ConversationId) -> Result<&Conversation, FairwayError> {
        self.conversations
            .get(id)
            .ok_or_else(|| FairwayError::Validation(format!("unknown conversation {id}")))
    }

    fn conversation_mut(&mut self, id: &ConversationId) -> Result<&mut Conversation, FairwayError> {
        self.conversations
            .get_mut(id)
            .ok_or_else(|| FairwayError::Validation(format!("unknown conversation {id}")))
    }

    fn unread(&self, conversation: &ConversationId, user: &UserId, after: Option<Timestamp>) -> u64 {
        self.messages
            .get(conversation)
            .map(|msgs| {
                msgs.values()
                    .filter(|m| !m.deleted && m.sender_id != *user)
                    .filter(|m| after.is_none_or(|after| m.created_at > after))
                    .count() as u64
            })
            .unwrap_or(0)
    }

    fn memberships(&self, user: &UserId) -> Vec<ConversationId> {
        let mut ids: Vec<_> = self
            .conversations
            .values()
            .filter(|c| c.is_member(user))
            .map(|c| c.id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Deliver to every feed listening on the message's conversation or globally.
    fn broadcast(&mut self, event: &MessageEvent) {
        let conversation = &event.message().conversation_id;
        self.feeds.retain(|feed| !feed.is_closed());
        for feed in &self.feeds {
            let wanted = match feed.scope() {
                ChannelScope::Global => true,
                ChannelScope::Conversation(id) => id == conversation,
            };
            if wanted {
                feed.send(ChannelSignal::Event(event.clone()));
            }
        }
    }

    fn store_message(&mut self, message: Message) -> Result<(), FairwayError> {
        if self.message_index.contains_key(&message.id) {
            return Err(FairwayError::Conflict(format!(
                "duplicate message id {}",
                message.id
            )));
        }
        self.message_index.insert(
            message.id.clone(),
            (message.created_at, message.conversation_id.clone()),
        );
        self.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .insert(message.order_key(), message);
        Ok(())
    }

    fn message_mut(&mut self, id: &MessageId) -> Result<&mut Message, FairwayError> {
        let (created_at, conversation) = self
            .message_index
            .get(id)
            .cloned()
            .ok_or_else(|| FairwayError::Validation(format!("unknown message {id}")))?;
        self.messages
            .get_mut(&conversation)
            .and_then(|msgs| msgs.get_mut(&(created_at, id.clone())))
            .ok_or_else(|| FairwayError::Internal(format!("message index out of sync for {id}")))
    }
}

/// Remote store held entirely in memory.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Find or create the one-to-one conversation between `a` and `b`.
    pub fn create_direct(&self, a: &UserId, b: &UserId) -> Result<Conversation, FairwayError> {
        if a == b {
            return Err(FairwayError::Validation(
                "a direct conversation needs two distinct members".into(),
            ));
        }
        let mut state = self.lock();
        let existing = state.conversations.values().find(|c| {
            c.kind == ConversationKind::Direct && c.is_member(a) && c.is_member(b)
        });
        if let Some(conversation) = existing {
            return Ok(conversation.clone());
        }

        let members = [a, b]
            .into_iter()
            .map(|u| (u.clone(), MembershipStatus::Approved))
            .collect();
        let conversation = Conversation {
            id: ConversationId::from(format!("dm-{}", Uuid::new_v4())),
            kind: ConversationKind::Direct,
            title: None,
            created_by: a.clone(),
            members,
            created_at: self.clock.now(),
        };
        state
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        info!(conversation = %conversation.id, "direct conversation created");
        Ok(conversation)
    }

    /// Create a group owned by `creator` with `members` pre-approved.
    pub fn create_group(
        &self,
        creator: &UserId,
        title: &str,
        members: &[UserId],
    ) -> Result<Conversation, FairwayError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(FairwayError::Validation("group title must not be empty".into()));
        }
        let members = std::iter::once(creator)
            .chain(members)
            .map(|u| (u.clone(), MembershipStatus::Approved))
            .collect();
        let conversation = Conversation {
            id: ConversationId::from(format!("group-{}", Uuid::new_v4())),
            kind: ConversationKind::Group,
            title: Some(title.to_string()),
            created_by: creator.clone(),
            members,
            created_at: self.clock.now(),
        };
        self.lock()
            .conversations
            .insert(conversation.id.clone(), conversation.clone());
        info!(conversation = %conversation.id, "group created");
        Ok(conversation)
    }

    /// Ask to join a group. Direct conversations have fixed membership.
    pub fn request_join(&self, id: &ConversationId, user: &UserId) -> Result<(), FairwayError> {
        let mut state = self.lock();
        let conversation = state.conversation_mut(id)?;
        if conversation.kind == ConversationKind::Direct {
            return Err(FairwayError::Validation(
                "direct conversations do not accept join requests".into(),
            ));
        }
        conversation
            .members
            .entry(user.clone())
            .or_insert(MembershipStatus::Pending);
        Ok(())
    }

    /// Approve a pending request. Only the group creator may approve.
    pub fn approve_member(
        &self,
        id: &ConversationId,
        approver: &UserId,
        user: &UserId,
    ) -> Result<(), FairwayError> {
        let mut state = self.lock();
        let conversation = state.conversation_mut(id)?;
        if conversation.created_by != *approver {
            return Err(FairwayError::Validation(format!(
                "{approver} cannot approve members of {id}"
            )));
        }
        match conversation.members.get_mut(user) {
            Some(status) => {
                *status = MembershipStatus::Approved;
                Ok(())
            }
            None => Err(FairwayError::Validation(format!(
                "{user} has not requested to join {id}"
            ))),
        }
    }

    /// Leave a conversation. Read cursors for it are dropped.
    pub fn leave(&self, id: &ConversationId, user: &UserId) -> Result<(), FairwayError> {
        let mut state = self.lock();
        state.conversation_mut(id)?.members.remove(user);
        state.cursors.remove(&(user.clone(), id.clone()));
        Ok(())
    }

    pub fn conversation(&self, id: &ConversationId) -> Option<Conversation> {
        self.lock().conversations.get(id).cloned()
    }

    /// Store a message with a caller-chosen id and timestamp and fan it out.
    pub fn import(&self, message: Message) -> Result<(), FairwayError> {
        let mut state = self.lock();
        state.conversation(&message.conversation_id)?;
        state.store_message(message.clone())?;
        state.broadcast(&MessageEvent::Insert(message));
        Ok(())
    }

    /// Push an event to listeners without touching stored data.
    ///
    /// Reproduces duplicate or out-of-order realtime delivery.
    pub fn inject(&self, event: MessageEvent) {
        self.lock().broadcast(&event);
    }

    pub fn edit_message(&self, id: &MessageId, body: &str) -> Result<Message, FairwayError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let message = state.message_mut(id)?;
        message.body = body.to_string();
        message.edited_at = Some(now);
        let updated = message.clone();
        state.broadcast(&MessageEvent::Update(updated.clone()));
        Ok(updated)
    }

    pub fn delete_message(&self, id: &MessageId) -> Result<Message, FairwayError> {
        let now = self.clock.now();
        let mut state = self.lock();
        let message = state.message_mut(id)?;
        message.deleted = true;
        message.body.clear();
        message.edited_at = Some(now);
        let updated = message.clone();
        state.broadcast(&MessageEvent::Update(updated.clone()));
        Ok(updated)
    }

    /// Fail every open channel with `reason`, as a network flap would.
    pub fn disconnect_all(&self, reason: &str) -> usize {
        let mut state = self.lock();
        let feeds = std::mem::take(&mut state.feeds);
        let count = feeds.iter().filter(|f| !f.is_closed()).count();
        for feed in feeds {
            feed.send(ChannelSignal::Error(reason.to_string()));
        }
        debug!(count, reason, "dropped all push channels");
        count
    }

    /// Open channels, including ones whose consumer is gone but not yet pruned.
    pub fn live_channels(&self) -> usize {
        let mut state = self.lock();
        state.feeds.retain(|feed| !feed.is_closed());
        state.feeds.len()
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<HealthStatus, FairwayError> {
        Ok(HealthStatus::Healthy)
    }

    async fn insert(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message, FairwayError> {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.conversation(conversation)?.is_member(sender) {
            return Err(FairwayError::Validation(format!(
                "{sender} is not a member of {conversation}"
            )));
        }
        state.next_message += 1;
        let message = Message {
            id: MessageId::from(format!("m{:08}", state.next_message)),
            conversation_id: conversation.clone(),
            sender_id: sender.clone(),
            body: body.to_string(),
            created_at: now,
            edited_at: None,
            deleted: false,
        };
        state.store_message(message.clone())?;
        state.broadcast(&MessageEvent::Insert(message.clone()));
        Ok(message)
    }

    async fn query_messages(
        &self,
        conversation: &ConversationId,
        limit: usize,
        after: Option<Timestamp>,
    ) -> Result<Vec<Message>, FairwayError> {
        let state = self.lock();
        state.conversation(conversation)?;
        let Some(msgs) = state.messages.get(conversation) else {
            return Ok(Vec::new());
        };
        let page = match after {
            Some(after) => msgs
                .values()
                .filter(|m| m.created_at > after)
                .take(limit)
                .cloned()
                .collect(),
            None => {
                let mut newest: Vec<Message> = msgs.values().rev().take(limit).cloned().collect();
                newest.reverse();
                newest
            }
        };
        Ok(page)
    }

    async fn subscribe(&self, scope: &ChannelScope) -> Result<PushChannel, FairwayError> {
        if let ChannelScope::Conversation(id) = scope {
            self.lock().conversation(id)?;
        }
        let (channel, feed) = PushChannel::pair(scope.clone());
        feed.send(ChannelSignal::State(ConnectivityState::Pending));
        feed.send(ChannelSignal::State(ConnectivityState::Active));
        self.lock().feeds.push(feed);
        debug!(%scope, "push channel opened");
        Ok(channel)
    }

    async fn get_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<Timestamp>, FairwayError> {
        Ok(self
            .lock()
            .cursors
            .get(&(user.clone(), conversation.clone()))
            .copied())
    }

    async fn set_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), FairwayError> {
        self.lock()
            .cursors
            .insert((user.clone(), conversation.clone()), at);
        Ok(())
    }

    async fn batch_unread_counts(
        &self,
        user: &UserId,
        last_read: &HashMap<ConversationId, Timestamp>,
    ) -> Result<UnreadCounts, FairwayError> {
        let state = self.lock();
        let mut counts = UnreadCounts::default();
        for id in state.memberships(user) {
            let unread = state.unread(&id, user, last_read.get(&id).copied());
            counts.total += unread;
            counts.per_conversation.insert(id, unread);
        }
        Ok(counts)
    }

    async fn list_memberships(&self, user: &UserId) -> Result<Vec<ConversationId>, FairwayError> {
        Ok(self.lock().memberships(user))
    }

    async fn count_unread(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        after: Option<Timestamp>,
    ) -> Result<u64, FairwayError> {
        let state = self.lock();
        state.conversation(conversation)?;
        Ok(state.unread(conversation, user, after))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::ManualClock;
    use std::time::Duration;

    fn setup() -> (MemoryStore, Arc<ManualClock>, Conversation) {
        let clock = Arc::new(ManualClock::new(DateTime::from_timestamp(1_000, 0).unwrap()));
        let store = MemoryStore::new(clock.clone());
        let room = store
            .create_direct(&UserId::from("alice"), &UserId::from("bob"))
            .unwrap();
        (store, clock, room)
    }

    #[tokio::test]
    async fn direct_conversation_is_reused() {
        let (store, _, room) = setup();
        let again = store
            .create_direct(&UserId::from("bob"), &UserId::from("alice"))
            .unwrap();
        assert_eq!(room.id, again.id);
        assert!(store.request_join(&room.id, &UserId::from("carol")).is_err());
    }

    #[tokio::test]
    async fn pending_members_cannot_post_until_approved() {
        let (store, _, _) = setup();
        let owner = UserId::from("owner");
        let guest = UserId::from("guest");
        let group = store.create_group(&owner, "Sunday skins", &[]).unwrap();

        store.request_join(&group.id, &guest).unwrap();
        assert!(store.insert(&group.id, &guest, "hi").await.is_err());
        assert!(store.list_memberships(&guest).await.unwrap().is_empty());

        assert!(store.approve_member(&group.id, &guest, &guest).is_err());
        store.approve_member(&group.id, &owner, &guest).unwrap();
        store.insert(&group.id, &guest, "hi").await.unwrap();
        assert_eq!(store.list_memberships(&guest).await.unwrap(), vec![group.id]);
    }

    #[tokio::test]
    async fn query_returns_ascending_pages() {
        let (store, clock, room) = setup();
        let alice = UserId::from("alice");
        for n in 0..5 {
            clock.advance(Duration::from_secs(1));
            store.insert(&room.id, &alice, &format!("msg {n}")).await.unwrap();
        }

        let newest = store.query_messages(&room.id, 2, None).await.unwrap();
        assert_eq!(
            newest.iter().map(|m| m.body.as_str()).collect::<Vec<_>>(),
            vec!["msg 3", "msg 4"]
        );

        let after = newest[0].created_at - chrono::Duration::seconds(2);
        let page = store.query_messages(&room.id, 10, Some(after)).await.unwrap();
        assert_eq!(page.len(), 3);
        assert!(page.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
    }

    #[tokio::test]
    async fn subscribe_confirms_and_receives_events() {
        let (store, _, room) = setup();
        let mut channel = store
            .subscribe(&ChannelScope::Conversation(room.id.clone()))
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelSignal::State(ConnectivityState::Pending))
        );
        assert_eq!(
            channel.recv().await,
            Some(ChannelSignal::State(ConnectivityState::Active))
        );

        let sent = store
            .insert(&room.id, &UserId::from("bob"), "on the tee")
            .await
            .unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelSignal::Event(MessageEvent::Insert(sent.clone())))
        );

        let edited = store.edit_message(&sent.id, "on the green").unwrap();
        assert_eq!(
            channel.recv().await,
            Some(ChannelSignal::Event(MessageEvent::Update(edited)))
        );
    }

    #[tokio::test]
    async fn closed_channels_are_pruned() {
        let (store, _, _) = setup();
        let channel = store.subscribe(&ChannelScope::Global).await.unwrap();
        assert_eq!(store.live_channels(), 1);
        drop(channel);
        assert_eq!(store.live_channels(), 0);
    }

    #[tokio::test]
    async fn disconnect_sends_error_to_listeners() {
        let (store, _, _) = setup();
        let mut channel = store.subscribe(&ChannelScope::Global).await.unwrap();
        assert_eq!(store.disconnect_all("CHANNEL_ERROR"), 1);
        let mut last = None;
        while let Some(signal) = channel.recv().await {
            last = Some(signal);
        }
        assert_eq!(last, Some(ChannelSignal::Error("CHANNEL_ERROR".into())));
    }

    #[tokio::test]
    async fn unread_counts_skip_own_and_deleted_messages() {
        let (store, clock, room) = setup();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        store.insert(&room.id, &alice, "mine").await.unwrap();
        clock.advance(Duration::from_secs(1));
        let first = store.insert(&room.id, &bob, "one").await.unwrap();
        clock.advance(Duration::from_secs(1));
        let second = store.insert(&room.id, &bob, "two").await.unwrap();
        clock.advance(Duration::from_secs(1));
        let third = store.insert(&room.id, &bob, "three").await.unwrap();
        store.delete_message(&third.id).unwrap();

        assert_eq!(store.count_unread(&room.id, &alice, None).await.unwrap(), 2);
        assert_eq!(
            store
                .count_unread(&room.id, &alice, Some(first.created_at))
                .await
                .unwrap(),
            1
        );

        let mut cursors = HashMap::new();
        cursors.insert(room.id.clone(), second.created_at);
        let counts = store.batch_unread_counts(&alice, &cursors).await.unwrap();
        assert_eq!(counts.total, 0);
        assert_eq!(counts.per_conversation.get(&room.id), Some(&0));
    }

    #[tokio::test]
    async fn import_rejects_duplicate_ids() {
        let (store, clock, room) = setup();
        let message = Message {
            id: MessageId::from("fixed"),
            conversation_id: room.id.clone(),
            sender_id: UserId::from("bob"),
            body: "x".into(),
            created_at: clock.now(),
            edited_at: None,
            deleted: false,
        };
        store.import(message.clone()).unwrap();
        assert!(matches!(store.import(message), Err(FairwayError::Conflict(_))));
    }

    #[tokio::test]
    async fn leaving_removes_membership_and_cursor() {
        let (store, clock, room) = setup();
        let alice = UserId::from("alice");
        store
            .set_last_read_cursor(&alice, &room.id, clock.now())
            .await
            .unwrap();
        store.leave(&room.id, &alice).unwrap();
        assert!(store.list_memberships(&alice).await.unwrap().is_empty());
        assert_eq!(
            store.get_last_read_cursor(&alice, &room.id).await.unwrap(),
            None
        );
    }
}
