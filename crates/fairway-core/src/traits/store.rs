// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contract for the remote message store.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::channel::{ChannelScope, PushChannel};
use crate::error::FairwayError;
use crate::types::{ConversationId, HealthStatus, Message, Timestamp, UnreadCounts, UserId};

/// Remote persistence service offering insert, query and subscribe primitives.
///
/// Implementations must be safe to share across tasks. Every method may fail
/// with a transient [`FairwayError::Store`]; callers decide whether to retry.
#[async_trait]
pub trait MessageStore: Send + Sync + 'static {
    /// Human-readable backend name, used in logs.
    fn name(&self) -> &str;

    async fn health_check(&self) -> Result<HealthStatus, FairwayError>;

    /// Persist a new message. The store assigns identifier and timestamp.
    async fn insert(
        &self,
        conversation: &ConversationId,
        sender: &UserId,
        body: &str,
    ) -> Result<Message, FairwayError>;

    /// Up to `limit` messages in ascending creation order.
    ///
    /// With `after`, only messages created strictly later are returned, oldest
    /// first. Without it, the newest `limit` messages are returned.
    async fn query_messages(
        &self,
        conversation: &ConversationId,
        limit: usize,
        after: Option<Timestamp>,
    ) -> Result<Vec<Message>, FairwayError>;

    /// Open a push channel for `scope`.
    ///
    /// The channel emits `pending` then `active` once the server confirms the
    /// subscription, and `erroring`/`closed` on failure.
    async fn subscribe(&self, scope: &ChannelScope) -> Result<PushChannel, FairwayError>;

    async fn get_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<Timestamp>, FairwayError>;

    async fn set_last_read_cursor(
        &self,
        user: &UserId,
        conversation: &ConversationId,
        at: Timestamp,
    ) -> Result<(), FairwayError>;

    /// Unread counts for every conversation `user` belongs to, in one round trip.
    ///
    /// `last_read` supplies the caller's cursors; conversations missing from the
    /// map count every message not sent by `user`.
    async fn batch_unread_counts(
        &self,
        user: &UserId,
        last_read: &HashMap<ConversationId, Timestamp>,
    ) -> Result<UnreadCounts, FairwayError>;

    /// Conversations where `user` is an approved member.
    async fn list_memberships(&self, user: &UserId) -> Result<Vec<ConversationId>, FairwayError>;

    /// Messages in `conversation` created after `after`, excluding those sent by `user`.
    async fn count_unread(
        &self,
        conversation: &ConversationId,
        user: &UserId,
        after: Option<Timestamp>,
    ) -> Result<u64, FairwayError>;
}
