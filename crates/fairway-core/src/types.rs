// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared by the store contract and the sync engine.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Server-assigned wall-clock timestamp.
pub type Timestamp = DateTime<Utc>;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Unique identifier for a conversation (room).
    ConversationId
);

string_id!(
    /// Unique identifier for a message.
    MessageId
);

string_id!(
    /// Unique identifier for a user.
    UserId
);

/// Health status reported by store health checks and the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Operational but degraded (for example, running on the polling fallback).
    Degraded(String),
    /// Not operational.
    Unhealthy(String),
}

/// Whether a conversation is a one-to-one chat or a group.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
    Direct,
    Group,
}

/// Membership state of a user in a conversation.
///
/// Direct conversations only ever hold approved members. Group conversations
/// may hold pending join requests, which do not count as membership.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    Pending,
    Approved,
}

/// A conversation as owned by the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub kind: ConversationKind,
    pub title: Option<String>,
    pub created_by: UserId,
    pub members: BTreeMap<UserId, MembershipStatus>,
    pub created_at: Timestamp,
}

impl Conversation {
    /// Whether `user` is an approved member.
    pub fn is_member(&self, user: &UserId) -> bool {
        self.members.get(user) == Some(&MembershipStatus::Approved)
    }

    /// Approved members in identifier order.
    pub fn approved_members(&self) -> impl Iterator<Item = &UserId> {
        self.members
            .iter()
            .filter(|(_, status)| **status == MembershipStatus::Approved)
            .map(|(user, _)| user)
    }
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub created_at: Timestamp,
    /// Set when the server applied an edit.
    #[serde(default)]
    pub edited_at: Option<Timestamp>,
    /// Set when the server tombstoned the message.
    #[serde(default)]
    pub deleted: bool,
}

impl Message {
    /// Ordering key for rendered timelines: creation time, ties broken by id.
    pub fn order_key(&self) -> (Timestamp, MessageId) {
        (self.created_at, self.id.clone())
    }
}

/// A realtime event delivered by a push channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum MessageEvent {
    Insert(Message),
    Update(Message),
}

impl MessageEvent {
    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Insert(m) | MessageEvent::Update(m) => m,
        }
    }

    pub fn into_message(self) -> Message {
        match self {
            MessageEvent::Insert(m) | MessageEvent::Update(m) => m,
        }
    }
}

/// Result of a batched unread computation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCounts {
    pub total: u64,
    pub per_conversation: HashMap<ConversationId, u64>,
}

/// Whether the host application is visible to the user.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Foreground,
    Background,
}

/// Why a backfill was requested.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BackfillReason {
    Reconnected,
    Foreground,
    PullToRefresh,
    Polling,
    /// The host reported that the network came back.
    NetworkOnline,
    /// The link watchdog restarted a silent realtime connection.
    StaleRestart,
    /// Channels were re-established after a suspend.
    Resumed,
}
