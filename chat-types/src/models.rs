//! Domain records exchanged with the relay and the REST API.
//!
//! Field names follow the server's JSON (`_id`, `chatName`, `isGroupChat`,
//! ...). Client-only bookkeeping (delivery state, local ids) is skipped
//! during serialization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::{ConversationId, LocalId, MessageId, UserId};

/// A registered user as the server describes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Server id.
    #[serde(rename = "_id")]
    pub id: UserId,
    /// Display name.
    pub name: String,
    /// Email address (may be omitted in populated sub-documents).
    #[serde(default)]
    pub email: String,
    /// Avatar URL.
    #[serde(default)]
    pub pic: String,
}

impl User {
    /// Create a user with just an id and a name.
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: String::new(),
            pic: String::new(),
        }
    }
}

/// Delivery state of a message from the local user's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryState {
    /// Appended optimistically, no acknowledgement yet.
    Pending,
    /// Acknowledged by the server (or received from it).
    #[default]
    Delivered,
    /// The acknowledgement reported a failure or never arrived.
    Failed,
}

/// A chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Server id; absent until the server acknowledges the message.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    /// Client correlation id for optimistic entries.
    #[serde(skip)]
    pub local_id: Option<LocalId>,
    /// Conversation the message belongs to.
    #[serde(rename = "chat", alias = "conversationId")]
    pub conversation_id: ConversationId,
    /// Author.
    pub sender: User,
    /// Text body.
    #[serde(rename = "message")]
    pub body: String,
    /// Creation time as reported by whoever created the record.
    #[serde(rename = "createdAt", default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Local delivery state.
    #[serde(skip)]
    pub delivery: DeliveryState,
}

impl Message {
    /// Build an optimistic, not yet acknowledged message.
    pub fn pending(
        conversation_id: ConversationId,
        sender: User,
        body: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            local_id: Some(LocalId::new()),
            conversation_id,
            sender,
            body: body.into(),
            created_at,
            delivery: DeliveryState::Pending,
        }
    }

    /// True if the given user authored this message.
    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender.id == user
    }
}

/// A conversation (one-to-one or group chat).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Server id.
    #[serde(rename = "_id")]
    pub id: ConversationId,
    /// Group name; empty for one-to-one chats.
    #[serde(rename = "chatName", default)]
    pub name: String,
    /// Whether this is a group chat.
    #[serde(rename = "isGroupChat", default)]
    pub is_group: bool,
    /// Participants, in server order.
    #[serde(rename = "users", default)]
    pub participants: Vec<User>,
    /// Most recent message, when the server populated it.
    #[serde(
        rename = "latestMessage",
        default,
        deserialize_with = "lenient_message",
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_message: Option<Message>,
}

impl Conversation {
    /// Name to show for this conversation from `me`'s point of view.
    ///
    /// Group chats use their name; one-to-one chats use the other
    /// participant's name.
    pub fn display_name(&self, me: &UserId) -> String {
        if self.is_group {
            return self.name.clone();
        }
        self.participants
            .iter()
            .find(|u| &u.id != me)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }

    /// The participant that is not `me` (one-to-one chats).
    pub fn counterpart(&self, me: &UserId) -> Option<&User> {
        self.participants.iter().find(|u| &u.id != me)
    }
}

/// `latestMessage` is sometimes an unpopulated id; treat anything that is not
/// a full message as absent.
fn lenient_message<'de, D>(deserializer: D) -> Result<Option<Message>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

/// Reference to a conversation: either a bare id or a populated document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConversationRef {
    /// Fully populated conversation.
    Populated(Box<Conversation>),
    /// Bare id; metadata must be resolved from the conversation list.
    Id(ConversationId),
}

impl ConversationRef {
    /// The referenced conversation id.
    pub fn id(&self) -> &ConversationId {
        match self {
            Self::Populated(c) => &c.id,
            Self::Id(id) => id,
        }
    }

    /// The populated conversation, if the server sent one.
    pub fn populated(&self) -> Option<&Conversation> {
        match self {
            Self::Populated(c) => Some(c),
            Self::Id(_) => None,
        }
    }
}

/// Unread counter for one conversation, as pushed or fetched from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// The conversation the count applies to.
    pub chat: ConversationRef,
    /// Authoritative unread count.
    pub count: u32,
    /// Most recent unseen message, if any.
    #[serde(
        rename = "lastMessage",
        default,
        deserialize_with = "lenient_message",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_message: Option<Message>,
}

/// Online status of a conversation's counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    /// Connected right now.
    Online,
    /// Not connected.
    Offline,
}

/// A message in an anonymous random-talk session. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransientMessage {
    /// Author (the local user or the matched peer).
    pub sender: User,
    /// Text body.
    pub body: String,
    /// Local receive/send time.
    pub at: DateTime<Utc>,
}
