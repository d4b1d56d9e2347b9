// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Events published by the engine for the rendering layer.

use chrono::{DateTime, Utc};
use fairway_core::{ChannelScope, ConnectivityState, ConversationId, Message};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A UI-facing change produced by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A message was added to the active timeline at `position`.
    MessageRendered {
        conversation_id: ConversationId,
        message: Message,
        position: usize,
    },
    /// A rendered message was edited or tombstoned in place.
    MessageUpdated {
        conversation_id: ConversationId,
        message: Message,
        position: usize,
    },
    /// Unread badge for a conversation that is not open.
    BadgeChanged {
        conversation_id: ConversationId,
        count: u64,
    },
    TotalUnreadChanged { total: u64 },
    ConnectivityChanged {
        scope: ChannelScope,
        state: ConnectivityState,
    },
}

impl EngineEvent {
    /// The conversation this event concerns, if any.
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            EngineEvent::MessageRendered {
                conversation_id, ..
            }
            | EngineEvent::MessageUpdated {
                conversation_id, ..
            }
            | EngineEvent::BadgeChanged {
                conversation_id, ..
            } => Some(conversation_id),
            EngineEvent::ConnectivityChanged { scope, .. } => scope.conversation_id(),
            EngineEvent::TotalUnreadChanged { .. } => None,
        }
    }
}

/// An event stamped with a unique id and publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub event_id: Uuid,
    pub published_at: DateTime<Utc>,
    #[serde(flatten)]
    pub event: EngineEvent,
}

impl Envelope {
    pub fn new(event: EngineEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            published_at: Utc::now(),
            event,
        }
    }

    /// JSON rendering for bridges that forward events out of process.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_json_is_flat_and_tagged() {
        let envelope = Envelope::new(EngineEvent::BadgeChanged {
            conversation_id: ConversationId::from("room-9"),
            count: 3,
        });
        let value: serde_json::Value = serde_json::from_str(&envelope.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "badge_changed");
        assert_eq!(value["conversation_id"], "room-9");
        assert_eq!(value["count"], 3);
        assert!(value["event_id"].is_string());
    }

    #[test]
    fn conversation_id_extracted_from_scope() {
        let event = EngineEvent::ConnectivityChanged {
            scope: ChannelScope::Conversation(ConversationId::from("r1")),
            state: ConnectivityState::Erroring,
        };
        assert_eq!(event.conversation_id().map(|c| c.as_str()), Some("r1"));
        let total = EngineEvent::TotalUnreadChanged { total: 2 };
        assert!(total.conversation_id().is_none());
    }
}
