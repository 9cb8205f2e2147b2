//! Message stream merging for the active conversation.
//!
//! The merger owns the message view of the one conversation the user has
//! open. Three sources feed it:
//! - optimistic local sends (appended as `Pending` right away)
//! - acknowledgements of those sends (carrying the stored copy with its id)
//! - server pushes, including echoes of our own messages
//!
//! Acks are matched to their pending entry by the [`LocalId`] captured at
//! send time. When that fails, the entry is located by content: same
//! conversation, sender and body, created within [`RECONCILE_WINDOW`] of the
//! server copy. Identical bodies are matched oldest first.

use std::collections::HashSet;
use std::time::Duration;

use chat_types::{ConversationId, DeliveryState, LocalId, Message, MessageId, User, UserId};
use chrono::{DateTime, Utc};

/// Maximum clock distance for content-based reconciliation.
pub const RECONCILE_WINDOW: Duration = Duration::from_secs(5);

/// A message ready to be emitted as `new message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Correlation id of the optimistic entry.
    pub local_id: LocalId,
    /// Conversation captured at send time.
    pub conversation: ConversationId,
    /// Payload for the send event.
    pub message: Message,
}

/// Result of applying an acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckOutcome {
    /// The server stored the message.
    Delivered {
        /// Conversation captured at send time.
        conversation: ConversationId,
        /// The stored copy.
        message: Message,
        /// Whether an entry in the current view was updated.
        in_view: bool,
    },
    /// The send failed or timed out.
    Failed {
        /// Conversation captured at send time.
        conversation: ConversationId,
        /// The entry that failed.
        local_id: LocalId,
    },
}

/// Where a pushed message went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteRouting {
    /// Appended to the active view.
    Appended,
    /// Already present (same id); dropped.
    Duplicate,
    /// Echo of our own pending message; merged into it.
    Reconciled(LocalId),
    /// Not for the active conversation; hand it to the notification path.
    Notify(Message),
}

/// Message view of the active conversation.
#[derive(Debug, Clone, Default)]
pub struct MessageMerger {
    active: Option<ConversationId>,
    messages: Vec<Message>,
}

impl MessageMerger {
    /// Create an empty merger with no active conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// The conversation currently shown.
    pub fn active(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    /// Messages of the active conversation, in display order.
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Look up an entry by its correlation id.
    pub fn find(&self, local_id: LocalId) -> Option<&Message> {
        self.messages.iter().find(|m| m.local_id == Some(local_id))
    }

    /// Switch the view. Returns false if the conversation was already active.
    pub fn activate(&mut self, conversation: Option<ConversationId>) -> bool {
        if self.active == conversation {
            return false;
        }
        self.active = conversation;
        self.messages.clear();
        true
    }

    /// Append an optimistic message and build its send payload.
    ///
    /// The entry only shows up in the view if `conversation` is active.
    pub fn send(
        &mut self,
        conversation: ConversationId,
        sender: User,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> OutgoingMessage {
        let message = Message::pending(conversation.clone(), sender, body, now);
        let local_id = message.local_id.unwrap_or_default();
        if self.active.as_ref() == Some(&conversation) {
            self.messages.push(message.clone());
        }
        OutgoingMessage {
            local_id,
            conversation,
            message,
        }
    }

    /// Put a failed or never-sent entry back to `Pending` for a manual retry.
    pub fn resend(&mut self, local_id: LocalId) -> Option<OutgoingMessage> {
        let entry = self
            .messages
            .iter_mut()
            .find(|m| m.local_id == Some(local_id) && m.id.is_none())?;
        entry.delivery = DeliveryState::Pending;
        Some(OutgoingMessage {
            local_id,
            conversation: entry.conversation_id.clone(),
            message: entry.clone(),
        })
    }

    /// Apply the acknowledgement of a send.
    ///
    /// `stored` is the server's copy, or `None` when the ack reported a
    /// failure or timed out. A copy without an id counts as a failure.
    pub fn on_ack(
        &mut self,
        local_id: LocalId,
        conversation: ConversationId,
        stored: Option<Message>,
    ) -> AckOutcome {
        let Some(stored) = stored.filter(|m| m.id.is_some()) else {
            if let Some(entry) = self
                .messages
                .iter_mut()
                .find(|m| m.local_id == Some(local_id) && m.id.is_none())
            {
                entry.delivery = DeliveryState::Failed;
            }
            return AckOutcome::Failed {
                conversation,
                local_id,
            };
        };

        let in_view = self.active.as_ref() == Some(&conversation) && self.settle(local_id, &stored);
        AckOutcome::Delivered {
            conversation,
            message: stored,
            in_view,
        }
    }

    /// Route a server-pushed message.
    pub fn on_remote(&mut self, message: Message, me: &UserId) -> RemoteRouting {
        if self.active.as_ref() != Some(&message.conversation_id) {
            return RemoteRouting::Notify(message);
        }
        if let Some(id) = &message.id {
            if self.contains(id) {
                return RemoteRouting::Duplicate;
            }
        }
        if message.is_from(me) {
            if let Some(index) = self.match_by_content(&message) {
                let entry = &mut self.messages[index];
                entry.id = message.id.clone();
                entry.delivery = DeliveryState::Delivered;
                if let Some(local_id) = entry.local_id {
                    return RemoteRouting::Reconciled(local_id);
                }
            }
        }
        let mut message = message;
        message.delivery = DeliveryState::Delivered;
        self.messages.push(message);
        RemoteRouting::Appended
    }

    /// Merge a history fetch into the view.
    ///
    /// Returns false (and changes nothing) if the user switched away from
    /// `conversation` while the fetch was in flight. Anything pushed or sent
    /// during the fetch is kept after the history, without duplicates.
    pub fn load_history(&mut self, conversation: &ConversationId, history: Vec<Message>) -> bool {
        if self.active.as_ref() != Some(conversation) {
            return false;
        }
        let known: HashSet<MessageId> = history.iter().filter_map(|m| m.id.clone()).collect();
        let live = std::mem::take(&mut self.messages);
        self.messages = history;
        self.messages.extend(
            live.into_iter()
                .filter(|m| m.id.as_ref().map_or(true, |id| !known.contains(id))),
        );
        true
    }

    fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| m.id.as_ref() == Some(id))
    }

    /// Mark the pending entry for `stored` as delivered. Returns true if the
    /// view holds the stored message afterwards.
    fn settle(&mut self, local_id: LocalId, stored: &Message) -> bool {
        let Some(id) = stored.id.clone() else {
            return false;
        };
        let index = self
            .messages
            .iter()
            .position(|m| m.local_id == Some(local_id))
            .or_else(|| self.match_by_content(stored));
        let Some(index) = index else {
            return self.contains(&id);
        };

        let entry = &mut self.messages[index];
        entry.id = Some(id.clone());
        entry.delivery = DeliveryState::Delivered;

        // An echo may have been appended separately before the ack arrived.
        let mut i = 0;
        self.messages.retain(|m| {
            let keep = i == index || m.id.as_ref() != Some(&id);
            i += 1;
            keep
        });
        true
    }

    /// Oldest unacknowledged own entry that looks like `server`.
    fn match_by_content(&self, server: &Message) -> Option<usize> {
        self.messages
            .iter()
            .position(|m| m.id.is_none() && m.local_id.is_some() && same_content(m, server))
    }
}

fn same_content(local: &Message, server: &Message) -> bool {
    let window = i64::try_from(RECONCILE_WINDOW.as_millis()).unwrap_or(i64::MAX);
    local.conversation_id == server.conversation_id
        && local.sender.id == server.sender.id
        && local.body == server.body
        && (local.created_at - server.created_at).num_milliseconds().abs() <= window
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> User {
        User::new("u1", "Alice")
    }

    fn bob() -> User {
        User::new("u2", "Bob")
    }

    fn me() -> UserId {
        UserId::new("u1")
    }

    fn c(id: &str) -> ConversationId {
        ConversationId::new(id)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn stored(id: &str, conv: &str, sender: User, body: &str, at: DateTime<Utc>) -> Message {
        Message {
            id: Some(MessageId::new(id)),
            local_id: None,
            conversation_id: c(conv),
            sender,
            body: body.into(),
            created_at: at,
            delivery: DeliveryState::Delivered,
        }
    }

    fn active(conv: &str) -> MessageMerger {
        let mut merger = MessageMerger::new();
        merger.activate(Some(c(conv)));
        merger
    }

    // ===========================================
    // Sending and acknowledgement
    // ===========================================

    #[test]
    fn send_appends_pending_entry() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));

        assert_eq!(merger.messages().len(), 1);
        let entry = &merger.messages()[0];
        assert_eq!(entry.delivery, DeliveryState::Pending);
        assert_eq!(entry.local_id, Some(out.local_id));
        assert_eq!(out.conversation, c("c1"));
        assert_eq!(out.message.body, "hi");
    }

    #[test]
    fn id_bearing_ack_marks_delivered() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));

        let outcome = merger.on_ack(
            out.local_id,
            out.conversation,
            Some(stored("m1", "c1", alice(), "hi", t(1))),
        );

        assert!(matches!(outcome, AckOutcome::Delivered { in_view: true, .. }));
        let entry = merger.find(out.local_id).unwrap();
        assert_eq!(entry.id, Some(MessageId::new("m1")));
        assert_eq!(entry.delivery, DeliveryState::Delivered);
    }

    #[test]
    fn failed_ack_keeps_entry_visible() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));

        let outcome = merger.on_ack(out.local_id, out.conversation, None);

        assert!(matches!(outcome, AckOutcome::Failed { .. }));
        assert_eq!(merger.messages().len(), 1);
        assert_eq!(merger.messages()[0].delivery, DeliveryState::Failed);
    }

    #[test]
    fn ack_without_id_is_a_failure() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));
        let mut copy = stored("m1", "c1", alice(), "hi", t(0));
        copy.id = None;

        let outcome = merger.on_ack(out.local_id, out.conversation, Some(copy));
        assert!(matches!(outcome, AckOutcome::Failed { .. }));
    }

    #[test]
    fn ack_after_switching_reports_captured_conversation() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));
        merger.activate(Some(c("c2")));

        let outcome = merger.on_ack(
            out.local_id,
            out.conversation,
            Some(stored("m1", "c1", alice(), "hi", t(0))),
        );

        match outcome {
            AckOutcome::Delivered {
                conversation,
                in_view,
                ..
            } => {
                assert_eq!(conversation, c("c1"));
                assert!(!in_view);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(merger.messages().is_empty());
    }

    #[test]
    fn resend_resets_failed_entry_to_pending() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));
        merger.on_ack(out.local_id, out.conversation.clone(), None);

        let again = merger.resend(out.local_id).unwrap();
        assert_eq!(again.local_id, out.local_id);
        assert_eq!(merger.messages()[0].delivery, DeliveryState::Pending);
    }

    // ===========================================
    // Remote pushes
    // ===========================================

    #[test]
    fn remote_for_active_conversation_is_appended_in_order() {
        let mut merger = active("c1");
        merger.on_remote(stored("m1", "c1", bob(), "one", t(0)), &me());
        merger.on_remote(stored("m2", "c1", bob(), "two", t(0)), &me());

        let bodies: Vec<_> = merger.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["one", "two"]);
    }

    #[test]
    fn remote_for_other_conversation_is_forwarded() {
        let mut merger = active("c1");
        let routing = merger.on_remote(stored("m1", "c2", bob(), "psst", t(0)), &me());

        assert!(matches!(routing, RemoteRouting::Notify(m) if m.conversation_id == c("c2")));
        assert!(merger.messages().is_empty());
    }

    #[test]
    fn remote_with_known_id_is_dropped() {
        let mut merger = active("c1");
        merger.on_remote(stored("m1", "c1", bob(), "one", t(0)), &me());
        let routing = merger.on_remote(stored("m1", "c1", bob(), "one", t(0)), &me());

        assert_eq!(routing, RemoteRouting::Duplicate);
        assert_eq!(merger.messages().len(), 1);
    }

    #[test]
    fn echo_before_ack_reconciles_pending_entry() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));

        let routing = merger.on_remote(stored("m1", "c1", alice(), "hi", t(2)), &me());
        assert_eq!(routing, RemoteRouting::Reconciled(out.local_id));
        assert_eq!(merger.messages().len(), 1);

        merger.on_ack(
            out.local_id,
            out.conversation,
            Some(stored("m1", "c1", alice(), "hi", t(2))),
        );
        assert_eq!(merger.messages().len(), 1);
        assert_eq!(merger.messages()[0].delivery, DeliveryState::Delivered);
    }

    #[test]
    fn echo_outside_window_is_a_new_message() {
        let mut merger = active("c1");
        merger.send(c("c1"), alice(), "hi", t(0));

        let routing = merger.on_remote(stored("m1", "c1", alice(), "hi", t(30)), &me());
        assert_eq!(routing, RemoteRouting::Appended);
        assert_eq!(merger.messages().len(), 2);
    }

    #[test]
    fn identical_bodies_match_oldest_first() {
        let mut merger = active("c1");
        let first = merger.send(c("c1"), alice(), "ok", t(0));
        let second = merger.send(c("c1"), alice(), "ok", t(1));

        let routing = merger.on_remote(stored("m1", "c1", alice(), "ok", t(1)), &me());
        assert_eq!(routing, RemoteRouting::Reconciled(first.local_id));
        assert_eq!(merger.find(second.local_id).unwrap().id, None);
    }

    #[test]
    fn scenario_a_pending_until_ack_then_echo_is_not_duplicated() {
        let mut merger = active("c1");
        let out = merger.send(c("c1"), alice(), "hi", t(0));
        assert_eq!(merger.messages()[0].delivery, DeliveryState::Pending);

        merger.on_ack(
            out.local_id,
            out.conversation,
            Some(stored("m1", "c1", alice(), "hi", t(1))),
        );
        let routing = merger.on_remote(stored("m1", "c1", alice(), "hi", t(1)), &me());

        assert_eq!(routing, RemoteRouting::Duplicate);
        assert_eq!(merger.messages().len(), 1);
        assert_eq!(merger.messages()[0].id, Some(MessageId::new("m1")));
        assert_eq!(merger.messages()[0].delivery, DeliveryState::Delivered);
    }

    // ===========================================
    // History
    // ===========================================

    #[test]
    fn stale_history_is_discarded() {
        let mut merger = active("c1");
        merger.activate(Some(c("c2")));

        let applied = merger.load_history(&c("c1"), vec![stored("m1", "c1", bob(), "old", t(0))]);
        assert!(!applied);
        assert!(merger.messages().is_empty());
    }

    #[test]
    fn history_merges_with_live_messages() {
        let mut merger = active("c1");
        merger.on_remote(stored("m2", "c1", bob(), "live", t(5)), &me());
        let out = merger.send(c("c1"), alice(), "mine", t(6));

        let applied = merger.load_history(
            &c("c1"),
            vec![
                stored("m1", "c1", bob(), "old", t(0)),
                stored("m2", "c1", bob(), "live", t(5)),
            ],
        );

        assert!(applied);
        let bodies: Vec<_> = merger.messages().iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["old", "live", "mine"]);
        assert!(merger.find(out.local_id).is_some());
    }

    #[test]
    fn activate_same_conversation_keeps_view() {
        let mut merger = active("c1");
        merger.on_remote(stored("m1", "c1", bob(), "one", t(0)), &me());

        assert!(!merger.activate(Some(c("c1"))));
        assert_eq!(merger.messages().len(), 1);

        assert!(merger.activate(None));
        assert!(merger.messages().is_empty());
    }
}
