//! Counterpart presence per conversation.
//!
//! Presence arrives two ways: pushed (`userStatus`) and pulled (the
//! `getUserStatus` acknowledgement when a conversation is opened). Both go
//! through [`PresenceBook::apply`], so whichever arrives last wins and the
//! two paths cannot disagree.

use std::collections::HashMap;
use std::fmt::Display;

use chat_types::{ConversationId, OnlineStatus};
use chrono::{DateTime, TimeZone, Utc};

/// Last known presence of a conversation's counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    /// Connected now.
    Online,
    /// Not connected.
    Offline {
        /// When they were last seen, if known.
        last_seen: Option<DateTime<Utc>>,
    },
}

/// Presence store keyed by conversation.
#[derive(Debug, Clone, Default)]
pub struct PresenceBook {
    entries: HashMap<ConversationId, Presence>,
}

impl PresenceBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a status. Returns true if the stored value changed.
    pub fn apply(
        &mut self,
        conversation: ConversationId,
        status: OnlineStatus,
        last_seen: Option<DateTime<Utc>>,
    ) -> bool {
        let presence = match status {
            OnlineStatus::Online => Presence::Online,
            OnlineStatus::Offline => Presence::Offline { last_seen },
        };
        self.entries.insert(conversation, presence) != Some(presence)
    }

    /// Stored presence for a conversation.
    pub fn get(&self, conversation: &ConversationId) -> Option<Presence> {
        self.entries.get(conversation).copied()
    }

    /// Human-readable status for the conversation header.
    ///
    /// Typing wins over presence. Returns `None` when nothing is known.
    pub fn status_line<Tz>(
        &self,
        conversation: &ConversationId,
        typing: bool,
        tz: &Tz,
    ) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        if typing {
            return Some("typing...".to_string());
        }
        match self.get(conversation)? {
            Presence::Online => Some("online".to_string()),
            Presence::Offline {
                last_seen: Some(at),
            } => Some(format!("Last seen: {}", format_last_seen(&at, tz))),
            Presence::Offline { last_seen: None } => Some("offline".to_string()),
        }
    }
}

/// Absolute local timestamp, e.g. `3/1/2024, 7:05:09 PM`.
pub fn format_last_seen<Tz>(at: &DateTime<Utc>, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    at.with_timezone(tz)
        .format("%-m/%-d/%Y, %-I:%M:%S %p")
        .to_string()
}
