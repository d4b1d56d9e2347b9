// SPDX-FileCopyrightText: 2026 Fairway Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rendered message timeline for the open conversation.

use std::collections::{BTreeMap, HashMap};

use fairway_core::{ConversationId, Message, MessageId, Timestamp};

/// Messages of one conversation in render order.
///
/// Keyed by `(created_at, id)`, so arrival order never affects placement and
/// no id can appear twice.
#[derive(Debug)]
pub struct Timeline {
    conversation: ConversationId,
    messages: BTreeMap<(Timestamp, MessageId), Message>,
    index: HashMap<MessageId, Timestamp>,
}

impl Timeline {
    /// Empty timeline for `conversation`.
    pub fn new(conversation: ConversationId) -> Self {
        Self {
            conversation,
            messages: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Place a new message. Returns its render position, or `None` when the
    /// id is already on the timeline or belongs to another conversation.
    pub fn insert(&mut self, message: Message) -> Option<usize> {
        if message.conversation_id != self.conversation || self.index.contains_key(&message.id) {
            return None;
        }
        let key = message.order_key();
        let position = self.messages.range(..&key).count();
        self.index.insert(message.id.clone(), message.created_at);
        self.messages.insert(key, message);
        Some(position)
    }

    /// Replace a rendered message in place, keeping its original position.
    pub fn apply_update(&mut self, mut message: Message) -> Option<usize> {
        let created_at = *self.index.get(&message.id)?;
        let key = (created_at, message.id.clone());
        let position = self.messages.range(..&key).count();
        message.created_at = created_at;
        self.messages.insert(key, message);
        Some(position)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.index.contains_key(id)
    }

    /// Rendered copy of `id`, including applied edits.
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        let created_at = *self.index.get(id)?;
        self.messages.get(&(created_at, id.clone()))
    }

    /// Latest message by creation time.
    pub fn newest(&self) -> Option<&Message> {
        self.messages.values().next_back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// Owned copy, oldest first.
    pub fn to_vec(&self) -> Vec<Message> {
        self.messages.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;
    use fairway_core::UserId;

    fn message(id: &str, secs: i64) -> Message {
        Message {
            id: MessageId::from(id),
            conversation_id: ConversationId::from("room-1"),
            sender_id: UserId::from("alice"),
            body: format!("body {id}"),
            created_at: DateTime::from_timestamp(secs, 0).unwrap(),
            edited_at: None,
            deleted: false,
        }
    }

    fn ids(timeline: &Timeline) -> Vec<&str> {
        timeline.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn out_of_order_arrivals_render_in_timestamp_order() {
        let mut timeline = Timeline::new(ConversationId::from("room-1"));
        assert_eq!(timeline.insert(message("c", 3)), Some(0));
        assert_eq!(timeline.insert(message("a", 1)), Some(0));
        assert_eq!(timeline.insert(message("b", 2)), Some(1));
        assert_eq!(ids(&timeline), ["a", "b", "c"]);
    }

    #[test]
    fn ties_break_by_id() {
        let mut timeline = Timeline::new(ConversationId::from("room-1"));
        timeline.insert(message("y", 5));
        assert_eq!(timeline.insert(message("x", 5)), Some(0));
        assert_eq!(ids(&timeline), ["x", "y"]);
    }

    #[test]
    fn duplicates_and_foreign_messages_are_rejected() {
        let mut timeline = Timeline::new(ConversationId::from("room-1"));
        assert!(timeline.insert(message("a", 1)).is_some());
        assert!(timeline.insert(message("a", 1)).is_none());

        let mut foreign = message("z", 2);
        foreign.conversation_id = ConversationId::from("room-2");
        assert!(timeline.insert(foreign).is_none());
        assert_eq!(timeline.len(), 1);
    }

    #[test]
    fn update_replaces_in_place() {
        let mut timeline = Timeline::new(ConversationId::from("room-1"));
        timeline.insert(message("a", 1));
        timeline.insert(message("b", 2));

        let mut edited = message("a", 99);
        edited.body = "edited".into();
        edited.edited_at = DateTime::from_timestamp(100, 0);
        assert_eq!(timeline.apply_update(edited), Some(0));

        let stored = timeline.get(&MessageId::from("a")).unwrap();
        assert_eq!(stored.body, "edited");
        assert_eq!(stored.created_at, DateTime::from_timestamp(1, 0).unwrap());
        assert_eq!(ids(&timeline), ["a", "b"]);
    }

    #[test]
    fn update_for_unknown_message_is_ignored() {
        let mut timeline = Timeline::new(ConversationId::from("room-1"));
        assert!(timeline.apply_update(message("ghost", 1)).is_none());
        assert!(timeline.is_empty());
        assert!(timeline.newest().is_none());
    }
}
