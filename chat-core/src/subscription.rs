//! Room subscription tracking.
//!
//! The server only delivers typing and presence signals for the room the
//! connection has joined. This tracker keeps the locally active conversation
//! and the server-side joined room apart so that switching, going offline
//! and reconnecting each produce the minimal leave/join sequence.

use chat_types::ConversationId;

/// A room change the connection must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAction {
    /// Emit `joinChat` for this conversation.
    Join(ConversationId),
    /// Emit `leaveChat` for this conversation.
    Leave(ConversationId),
}

/// Tracks the active conversation and the room joined on the server.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionTracker {
    active: Option<ConversationId>,
    joined: Option<ConversationId>,
    online: bool,
}

impl SubscriptionTracker {
    /// Create a tracker with nothing active, offline.
    pub fn new() -> Self {
        Self::default()
    }

    /// The locally active conversation.
    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// The room the server believes we are in.
    pub fn joined(&self) -> Option<&ConversationId> {
        self.joined.as_ref()
    }

    /// Check whether a conversation is the active one.
    pub fn is_active(&self, conversation: &ConversationId) -> bool {
        self.active.as_ref() == Some(conversation)
    }

    /// Change the active conversation.
    ///
    /// Selecting the already active conversation does nothing. While offline
    /// only the local selection changes; the join happens on reconnect.
    pub fn set_active(&mut self, next: Option<ConversationId>) -> Vec<SubscriptionAction> {
        if self.active == next {
            return Vec::new();
        }
        self.active = next;
        self.reconcile()
    }

    /// The connection (re)opened. The server starts with no rooms joined.
    pub fn on_connected(&mut self) -> Vec<SubscriptionAction> {
        self.online = true;
        self.joined = None;
        self.reconcile()
    }

    /// The connection closed; the server-side join is gone.
    pub fn on_disconnected(&mut self) {
        self.online = false;
        self.joined = None;
    }

    fn reconcile(&mut self) -> Vec<SubscriptionAction> {
        let mut actions = Vec::new();
        if !self.online || self.joined == self.active {
            return actions;
        }
        if let Some(prev) = self.joined.take() {
            actions.push(SubscriptionAction::Leave(prev));
        }
        if let Some(next) = &self.active {
            actions.push(SubscriptionAction::Join(next.clone()));
            self.joined = Some(next.clone());
        }
        actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conv(id: &str) -> Option<ConversationId> {
        Some(ConversationId::new(id))
    }

    fn online() -> SubscriptionTracker {
        let mut tracker = SubscriptionTracker::new();
        tracker.on_connected();
        tracker
    }

    #[test]
    fn first_selection_joins() {
        let mut tracker = online();
        let actions = tracker.set_active(conv("c1"));
        assert_eq!(actions, vec![SubscriptionAction::Join(ConversationId::new("c1"))]);
    }

    #[test]
    fn switching_leaves_then_joins_once() {
        let mut tracker = online();
        tracker.set_active(conv("c1"));

        let actions = tracker.set_active(conv("c2"));
        assert_eq!(
            actions,
            vec![
                SubscriptionAction::Leave(ConversationId::new("c1")),
                SubscriptionAction::Join(ConversationId::new("c2")),
            ]
        );
    }

    #[test]
    fn reselecting_same_conversation_is_a_no_op() {
        let mut tracker = online();
        tracker.set_active(conv("c1"));
        assert!(tracker.set_active(conv("c1")).is_empty());
    }

    #[test]
    fn deselecting_leaves() {
        let mut tracker = online();
        tracker.set_active(conv("c1"));
        let actions = tracker.set_active(None);
        assert_eq!(actions, vec![SubscriptionAction::Leave(ConversationId::new("c1"))]);
        assert!(tracker.joined().is_none());
    }

    #[test]
    fn offline_selection_joins_on_connect() {
        let mut tracker = SubscriptionTracker::new();
        assert!(tracker.set_active(conv("c1")).is_empty());
        assert!(tracker.set_active(conv("c2")).is_empty());

        let actions = tracker.on_connected();
        assert_eq!(actions, vec![SubscriptionAction::Join(ConversationId::new("c2"))]);
    }

    #[test]
    fn rejoins_after_reconnect_without_leave() {
        let mut tracker = online();
        tracker.set_active(conv("c1"));

        tracker.on_disconnected();
        assert!(tracker.joined().is_none());
        assert!(tracker.is_active(&ConversationId::new("c1")));

        let actions = tracker.on_connected();
        assert_eq!(actions, vec![SubscriptionAction::Join(ConversationId::new("c1"))]);
    }
}
