// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Push channel handle returned by [`MessageStore::subscribe`](crate::MessageStore::subscribe).
//!
//! A channel is a pair: the consumer side ([`PushChannel`]) owned by the
//! subscription manager, and the producer side ([`ChannelFeed`]) held by the
//! store backend. Dropping or closing the consumer cancels the feed, so the
//! backend stops delivering to it and no listener outlives its subscription.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::types::{ConversationId, MessageEvent};

/// What a push channel listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelScope {
    /// Inserts and updates for a single conversation.
    Conversation(ConversationId),
    /// Inserts across every conversation, used for badge updates.
    Global,
}

impl ChannelScope {
    pub fn conversation_id(&self) -> Option<&ConversationId> {
        match self {
            ChannelScope::Conversation(id) => Some(id),
            ChannelScope::Global => None,
        }
    }
}

impl fmt::Display for ChannelScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelScope::Conversation(id) => write!(f, "room:{id}"),
            ChannelScope::Global => f.write_str("global"),
        }
    }
}

impl From<ConversationId> for ChannelScope {
    fn from(id: ConversationId) -> Self {
        ChannelScope::Conversation(id)
    }
}

/// Connectivity state of a push channel or subscription.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConnectivityState {
    Pending,
    Active,
    Erroring,
    Closed,
}

/// A signal emitted by a push channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelSignal {
    /// The channel transitioned to a new connectivity state.
    State(ConnectivityState),
    /// The channel hit an error (`CHANNEL_ERROR`, `TIMED_OUT`); implies `Erroring`.
    Error(String),
    /// A message insert or update.
    Event(MessageEvent),
}

/// Consumer side of a push channel.
#[derive(Debug)]
pub struct PushChannel {
    scope: ChannelScope,
    signals: mpsc::UnboundedReceiver<ChannelSignal>,
    cancel: CancellationToken,
}

/// Producer side of a push channel, held by the store backend.
#[derive(Debug, Clone)]
pub struct ChannelFeed {
    scope: ChannelScope,
    tx: mpsc::UnboundedSender<ChannelSignal>,
    cancel: CancellationToken,
}

impl PushChannel {
    /// Create a connected channel pair for `scope`.
    pub fn pair(scope: ChannelScope) -> (PushChannel, ChannelFeed) {
        let (tx, signals) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        (
            PushChannel {
                scope: scope.clone(),
                signals,
                cancel: cancel.clone(),
            },
            ChannelFeed { scope, tx, cancel },
        )
    }

    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Next signal, or `None` once the producer side is gone.
    pub async fn recv(&mut self) -> Option<ChannelSignal> {
        self.signals.recv().await
    }

    /// Release the channel. Further feed sends are dropped.
    pub fn close(&mut self) {
        self.cancel.cancel();
        self.signals.close();
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl ChannelFeed {
    pub fn scope(&self) -> &ChannelScope {
        &self.scope
    }

    /// Deliver a signal. Returns `false` when the consumer has gone away.
    pub fn send(&self, signal: ChannelSignal) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(signal).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// Resolves when the consumer closes or drops the channel.
    pub async fn closed(&self) {
        self.cancel.cancelled().await;
    }
}
