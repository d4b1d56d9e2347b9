// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forward-only read cursors for the signed-in user.
//!
//! The in-memory map is authoritative for the session. Every advance is
//! written to the device cache and mirrored to the remote store; persistence
//! failures are logged and never roll the cursor back.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use fairway_core::{ConversationId, FairwayError, MessageStore, Timestamp, UserId};
use fairway_store::LocalCache;
use tracing::{debug, warn};

pub struct ReadCursors {
    store: Arc<dyn MessageStore>,
    local: Arc<LocalCache>,
    cursors: Mutex<HashMap<ConversationId, Timestamp>>,
}

impl ReadCursors {
    /// Empty cursor map backed by the remote store and the device cache.
    pub fn new(store: Arc<dyn MessageStore>, local: Arc<LocalCache>) -> Self {
        Self {
            store,
            local,
            cursors: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ConversationId, Timestamp>> {
        self.cursors.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Merge every cursor the device cache holds for `user`.
    pub async fn warm(&self, user: &UserId) -> Result<usize, FairwayError> {
        let stored = self.local.load_cursors(user).await?;
        let count = stored.len();
        let mut cursors = self.lock();
        for (conversation, at) in stored {
            merge(&mut cursors, conversation, at);
        }
        Ok(count)
    }

    /// Cursor for `conversation`, asking the remote store when the device has none.
    pub async fn load(
        &self,
        user: &UserId,
        conversation: &ConversationId,
    ) -> Result<Option<Timestamp>, FairwayError> {
        if let Some(at) = self.get(conversation) {
            return Ok(Some(at));
        }
        let remote = self.store.get_last_read_cursor(user, conversation).await?;
        let Some(at) = remote else {
            return Ok(None);
        };
        let merged = merge(&mut self.lock(), conversation.clone(), at);
        if let Err(e) = self.local.save_cursor(user, conversation, merged).await {
            warn!(conversation = %conversation, error = %e, "failed to cache remote read cursor");
        }
        Ok(Some(merged))
    }

    /// Known cursor for `conversation`, without a store round trip.
    pub fn get(&self, conversation: &ConversationId) -> Option<Timestamp> {
        self.lock().get(conversation).copied()
    }

    /// Every known cursor, used as the input to batched unread counts.
    pub fn snapshot(&self) -> HashMap<ConversationId, Timestamp> {
        self.lock().clone()
    }

    /// Move the cursor forward to `at`. Returns `false` when it was already there or later.
    pub async fn advance(&self, user: &UserId, conversation: &ConversationId, at: Timestamp) -> bool {
        {
            let mut cursors = self.lock();
            if cursors.get(conversation).is_some_and(|current| *current >= at) {
                return false;
            }
            cursors.insert(conversation.clone(), at);
        }
        debug!(conversation = %conversation, at = %at, "read cursor advanced");

        if let Err(e) = self.local.save_cursor(user, conversation, at).await {
            warn!(conversation = %conversation, error = %e, "failed to persist read cursor");
        }
        if let Err(e) = self.store.set_last_read_cursor(user, conversation, at).await {
            warn!(conversation = %conversation, error = %e, "failed to mirror read cursor");
        }
        true
    }

    /// Drop the cursor of a conversation the user left.
    pub async fn forget(&self, conversation: &ConversationId) {
        self.lock().remove(conversation);
        if let Err(e) = self.local.forget(conversation).await {
            warn!(conversation = %conversation, error = %e, "failed to forget cached cursor");
        }
    }
}

fn merge(
    cursors: &mut HashMap<ConversationId, Timestamp>,
    conversation: ConversationId,
    at: Timestamp,
) -> Timestamp {
    let slot = cursors.entry(conversation).or_insert(at);
    if at > *slot {
        *slot = at;
    }
    *slot
}
