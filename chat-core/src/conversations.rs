//! The user's conversation list, most recently active first.

use chat_types::{Conversation, ConversationId, Message, UserId};

use crate::notifications::NotificationAggregator;

/// Conversation as the UI lists it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView<'a> {
    /// The conversation.
    pub conversation: &'a Conversation,
    /// Name to show.
    pub display_name: String,
    /// Unread count; 0 if no notification entry exists.
    pub unseen_count: u32,
}

/// Ordered, duplicate-free list of conversations.
#[derive(Debug, Clone, Default)]
pub struct ConversationList {
    items: Vec<Conversation>,
}

impl ConversationList {
    /// Create an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list with a fresh fetch. Later duplicates are dropped.
    pub fn set_all(&mut self, conversations: Vec<Conversation>) {
        self.items.clear();
        for conversation in conversations {
            if !self.contains(&conversation.id) {
                self.items.push(conversation);
            }
        }
    }

    /// Add a conversation at the top. Returns false if it was already known.
    pub fn add(&mut self, conversation: Conversation) -> bool {
        if self.contains(&conversation.id) {
            return false;
        }
        self.items.insert(0, conversation);
        true
    }

    /// Record a new latest message and move its conversation to the top.
    ///
    /// Returns false if the conversation is not in the list.
    pub fn update_latest(&mut self, message: &Message) -> bool {
        let Some(index) = self.position(&message.conversation_id) else {
            return false;
        };
        let mut conversation = self.items.remove(index);
        conversation.latest_message = Some(message.clone());
        self.items.insert(0, conversation);
        true
    }

    /// Look up a conversation.
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.items.iter().find(|c| &c.id == id)
    }

    /// Check whether a conversation is known.
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.position(id).is_some()
    }

    /// Conversations in display order.
    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.items.iter()
    }

    /// Number of conversations.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Conversations with their derived unread counts.
    pub fn views<'a>(
        &'a self,
        notifications: &NotificationAggregator,
        me: &UserId,
    ) -> Vec<ConversationView<'a>> {
        self.items
            .iter()
            .map(|conversation| ConversationView {
                conversation,
                display_name: conversation.display_name(me),
                unseen_count: notifications.unseen_count(&conversation.id),
            })
            .collect()
    }

    fn position(&self, id: &ConversationId) -> Option<usize> {
        self.items.iter().position(|c| &c.id == id)
    }
}
