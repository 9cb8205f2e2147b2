//! Per-conversation unread counters.
//!
//! The server is the source of truth for counts: every push replaces the
//! stored count instead of incrementing it, so a repeated push is harmless.
//! Clearing is optimistic-but-confirmed: the entry stays until the server
//! acknowledges the clear request.
//!
//! Invariant: `total()` always equals the sum of all entry counts.

use std::collections::HashSet;

use chat_types::{Conversation, ConversationId, Message, Notification};

use crate::conversations::ConversationList;

/// Unread counter for one conversation. Only exists while `count > 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEntry {
    /// The conversation.
    pub conversation_id: ConversationId,
    /// Unread count, always positive.
    pub count: u32,
    /// Most recent unseen message.
    pub last_message: Option<Message>,
    /// Conversation metadata, when known.
    pub conversation: Option<Conversation>,
}

impl From<Notification> for NotificationEntry {
    fn from(notification: Notification) -> Self {
        let conversation_id = notification.chat.id().clone();
        let conversation = notification.chat.populated().cloned();
        Self {
            conversation_id,
            count: notification.count,
            last_message: notification.last_message,
            conversation,
        }
    }
}

/// Aggregates unread counters independently of the active conversation.
#[derive(Debug, Clone, Default)]
pub struct NotificationAggregator {
    entries: Vec<NotificationEntry>,
    clearing: HashSet<ConversationId>,
    total: u32,
}

impl NotificationAggregator {
    /// Create an empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything with a fresh fetch.
    pub fn replace_all(&mut self, notifications: Vec<Notification>) {
        self.entries.clear();
        for entry in notifications.into_iter().map(NotificationEntry::from) {
            if entry.count == 0
                || self
                    .entries
                    .iter()
                    .any(|e| e.conversation_id == entry.conversation_id)
            {
                continue;
            }
            self.entries.push(entry);
        }
        self.recompute_total();
    }

    /// Apply a pushed notification.
    pub fn apply(&mut self, notification: Notification) {
        let entry = NotificationEntry::from(notification);
        self.apply_delta(
            entry.conversation_id,
            entry.count,
            entry.last_message,
            entry.conversation,
        );
    }

    /// Replace the count for one conversation. A count of 0 removes the entry.
    pub fn apply_delta(
        &mut self,
        conversation_id: ConversationId,
        count: u32,
        last_message: Option<Message>,
        conversation: Option<Conversation>,
    ) {
        let existing = self
            .entries
            .iter()
            .position(|e| e.conversation_id == conversation_id);

        match (existing, count) {
            (Some(index), 0) => {
                self.entries.remove(index);
            }
            (None, 0) => {}
            (Some(index), count) => {
                let entry = &mut self.entries[index];
                entry.count = count;
                if last_message.is_some() {
                    entry.last_message = last_message;
                }
                if conversation.is_some() {
                    entry.conversation = conversation;
                }
            }
            (None, count) => self.entries.insert(
                0,
                NotificationEntry {
                    conversation_id,
                    count,
                    last_message,
                    conversation,
                },
            ),
        }
        self.recompute_total();
    }

    /// Start clearing a conversation's counter.
    ///
    /// Returns true if a clear request should be sent: there is something to
    /// clear and no request is already in flight.
    pub fn request_clear(&mut self, conversation_id: &ConversationId) -> bool {
        if self.unseen_count(conversation_id) == 0 {
            return false;
        }
        self.clearing.insert(conversation_id.clone())
    }

    /// The server acknowledged the clear; drop the entry.
    pub fn confirm_clear(&mut self, conversation_id: &ConversationId) {
        self.clearing.remove(conversation_id);
        self.entries.retain(|e| &e.conversation_id != conversation_id);
        self.recompute_total();
    }

    /// The clear request failed; keep the entry.
    pub fn abort_clear(&mut self, conversation_id: &ConversationId) {
        self.clearing.remove(conversation_id);
    }

    /// Check whether a clear request is in flight.
    pub fn is_clearing(&self, conversation_id: &ConversationId) -> bool {
        self.clearing.contains(conversation_id)
    }

    /// Dismiss every counter locally.
    pub fn clear_all(&mut self) {
        self.entries.clear();
        self.clearing.clear();
        self.recompute_total();
    }

    /// Unread count for a conversation; 0 when there is no entry.
    pub fn unseen_count(&self, conversation_id: &ConversationId) -> u32 {
        self.entries
            .iter()
            .find(|e| &e.conversation_id == conversation_id)
            .map_or(0, |e| e.count)
    }

    /// Total badge count.
    pub fn total(&self) -> u32 {
        self.total
    }

    /// Entries, newest first.
    pub fn entries(&self) -> &[NotificationEntry] {
        &self.entries
    }

    /// Conversations with a count but no metadata anywhere.
    ///
    /// The conversation list should be refreshed when this is non-empty.
    pub fn unresolved(&self, conversations: &ConversationList) -> Vec<ConversationId> {
        self.entries
            .iter()
            .filter(|e| e.conversation.is_none() && !conversations.contains(&e.conversation_id))
            .map(|e| e.conversation_id.clone())
            .collect()
    }

    /// Fill in missing metadata from a refreshed conversation list.
    pub fn resolve(&mut self, conversations: &ConversationList) {
        for entry in self.entries.iter_mut().filter(|e| e.conversation.is_none()) {
            entry.conversation = conversations.get(&entry.conversation_id).cloned();
        }
    }

    fn recompute_total(&mut self) {
        self.total = self
            .entries
            .iter()
            .fold(0u32, |sum, e| sum.saturating_add(e.count));
    }
}
