//! Protocol events exchanged over the persistent connection.
//!
//! Events are adjacently tagged (`{"event": ..., "data": ...}`) so they map
//! one-to-one onto [`Frame::Event`]. Payload fields are camelCase.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    AckId, ChatError, ConversationId, Frame, Message, MessageId, Notification, OnlineStatus, User,
    UserId,
};

/// Events the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Outbound {
    /// Register the connection for a user.
    #[serde(rename = "setup")]
    Setup(User),
    /// Subscribe to a conversation's room (typing, presence).
    #[serde(rename = "joinChat")]
    JoinChat(ConversationTarget),
    /// Unsubscribe from a conversation's room.
    #[serde(rename = "leaveChat")]
    LeaveChat(ConversationTarget),
    /// Local user started typing.
    #[serde(rename = "typing")]
    Typing(ConversationTarget),
    /// Local user stopped typing.
    #[serde(rename = "stopTyping")]
    StopTyping(ConversationTarget),
    /// Ask for the counterpart's presence (ack carries [`UserStatusReply`]).
    #[serde(rename = "getUserStatus")]
    GetUserStatus(ConversationTarget),
    /// Send a message (ack carries the stored message with its id).
    #[serde(rename = "new message")]
    NewMessage(Message),
    /// Confirm receipt of a pushed message.
    #[serde(rename = "messageReceivedAck")]
    MessageReceivedAck(MessageReceipt),
    /// Mark a conversation's notifications seen (ack carries [`ClearReply`]).
    #[serde(rename = "clearNotifications")]
    ClearNotifications(ConversationTarget),
    /// Ask the server to record an unseen message and push the new count.
    #[serde(rename = "addNotification")]
    AddNotification(NotificationRequest),
    /// Enter the random-talk matching pool.
    #[serde(rename = "findRandomTalk")]
    FindRandomTalk(UserTarget),
    /// Leave the random-talk matching pool.
    #[serde(rename = "cancelRandomTalk")]
    CancelRandomTalk(UserTarget),
    /// Message to the matched random-talk peer.
    #[serde(rename = "randomTalkMessage")]
    RandomTalkMessage(RandomMessageOut),
    /// Typing signal to the matched random-talk peer.
    #[serde(rename = "randomTalkTyping")]
    RandomTalkTyping(RandomTypingOut),
    /// End the random-talk session.
    #[serde(rename = "endRandomTalk")]
    EndRandomTalk(EndRandomTalk),
}

impl Outbound {
    /// Wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Setup(_) => "setup",
            Self::JoinChat(_) => "joinChat",
            Self::LeaveChat(_) => "leaveChat",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stopTyping",
            Self::GetUserStatus(_) => "getUserStatus",
            Self::NewMessage(_) => "new message",
            Self::MessageReceivedAck(_) => "messageReceivedAck",
            Self::ClearNotifications(_) => "clearNotifications",
            Self::AddNotification(_) => "addNotification",
            Self::FindRandomTalk(_) => "findRandomTalk",
            Self::CancelRandomTalk(_) => "cancelRandomTalk",
            Self::RandomTalkMessage(_) => "randomTalkMessage",
            Self::RandomTalkTyping(_) => "randomTalkTyping",
            Self::EndRandomTalk(_) => "endRandomTalk",
        }
    }

    /// Encode into a frame, optionally requesting an acknowledgement.
    pub fn into_frame(self, ack: Option<AckId>) -> Result<Frame, ChatError> {
        let (event, data) = split_tagged(serde_json::to_value(&self)?)?;
        Ok(Frame::Event { event, data, ack })
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum Inbound {
    /// Handshake finished; the connection is usable.
    #[serde(rename = "connected")]
    Connected,
    /// A message was posted in one of the user's conversations.
    #[serde(rename = "newMessage")]
    NewMessage(Message),
    /// Authoritative unread count for a conversation.
    #[serde(rename = "newNotification")]
    NewNotification(Notification),
    /// Someone in the joined room started typing.
    #[serde(rename = "typing")]
    Typing(TypingSignal),
    /// Someone in the joined room stopped typing.
    #[serde(rename = "stopTyping")]
    StopTyping(TypingSignal),
    /// Counterpart presence changed.
    #[serde(rename = "userStatus")]
    UserStatus(UserStatusUpdate),
    /// The connection was closed.
    #[serde(rename = "disconnect")]
    Disconnect(DisconnectNotice),
    /// The connection could not be established.
    #[serde(rename = "connect_error")]
    ConnectError(ConnectErrorNotice),
    /// The server paired us with a random peer.
    #[serde(rename = "randomTalkMatched")]
    RandomTalkMatched(RandomMatched),
    /// Message from the random-talk peer.
    #[serde(rename = "randomTalkMessage")]
    RandomTalkMessage(RandomMessageIn),
    /// Typing signal from the random-talk peer.
    #[serde(rename = "randomTalkTyping")]
    RandomTalkTyping(RandomTypingIn),
    /// The random-talk session ended.
    #[serde(rename = "randomTalkEnded")]
    RandomTalkEnded(RandomEnded),
}

impl Inbound {
    /// Every event name the client understands.
    pub const EVENT_NAMES: &'static [&'static str] = &[
        "connected",
        "newMessage",
        "newNotification",
        "typing",
        "stopTyping",
        "userStatus",
        "disconnect",
        "connect_error",
        "randomTalkMatched",
        "randomTalkMessage",
        "randomTalkTyping",
        "randomTalkEnded",
    ];

    /// Decode from an event name and payload.
    pub fn from_parts(event: &str, data: Value) -> Result<Self, ChatError> {
        if !Self::EVENT_NAMES.contains(&event) {
            return Err(ChatError::UnknownEvent(event.to_string()));
        }
        // Servers may attach session details to `connected`; none are used.
        if event == "connected" {
            return Ok(Self::Connected);
        }
        from_tagged(event, data)
    }

    /// Encode into a frame (used by test servers).
    pub fn into_frame(self) -> Result<Frame, ChatError> {
        let (event, data) = split_tagged(serde_json::to_value(&self)?)?;
        Ok(Frame::Event {
            event,
            data,
            ack: None,
        })
    }
}

fn split_tagged(value: Value) -> Result<(String, Value), ChatError> {
    let Value::Object(mut map) = value else {
        return Err(ChatError::InvalidPayload("event is not an object".into()));
    };
    let event = match map.remove("event") {
        Some(Value::String(name)) => name,
        _ => return Err(ChatError::InvalidPayload("missing event name".into())),
    };
    let data = map.remove("data").unwrap_or(Value::Null);
    Ok((event, data))
}

fn from_tagged<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, ChatError> {
    let mut map = serde_json::Map::new();
    map.insert("event".into(), Value::String(event.to_string()));
    if !data.is_null() {
        map.insert("data".into(), data);
    }
    serde_json::from_value(Value::Object(map))
        .map_err(|e| ChatError::InvalidPayload(format!("{event}: {e}")))
}

/// Payload naming a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationTarget {
    /// Target conversation.
    #[serde(alias = "chatId")]
    pub conversation_id: ConversationId,
}

impl From<ConversationId> for ConversationTarget {
    fn from(conversation_id: ConversationId) -> Self {
        Self { conversation_id }
    }
}

/// Payload naming a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTarget {
    /// Target user.
    pub user_id: UserId,
}

/// `messageReceivedAck` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageReceipt {
    /// The message that was received.
    pub message_id: MessageId,
}

/// `addNotification` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRequest {
    /// The user whose counter should be bumped (the local user).
    pub recipient: UserId,
    /// The unseen message.
    pub message: Message,
    /// Conversation the message belongs to.
    #[serde(alias = "chat")]
    pub conversation_id: ConversationId,
}

/// `typing` / `stopTyping` push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingSignal {
    /// Conversation the signal belongs to.
    #[serde(alias = "chatId")]
    pub conversation_id: ConversationId,
    /// Who is typing, when the server says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
}

/// `userStatus` push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusUpdate {
    /// Conversation whose counterpart changed status.
    #[serde(alias = "chatId")]
    pub conversation_id: ConversationId,
    /// New status.
    pub status: OnlineStatus,
    /// Last time the counterpart was seen (offline only).
    #[serde(default, alias = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Acknowledgement payload of `getUserStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatusReply {
    /// Counterpart status, absent if the server could not tell.
    #[serde(default)]
    pub status: Option<OnlineStatus>,
    /// Last time the counterpart was seen.
    #[serde(default, alias = "lastSeen", skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<DateTime<Utc>>,
}

/// Acknowledgement payload of `clearNotifications`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearReply {
    /// Whether the server cleared the counter.
    #[serde(default)]
    pub success: bool,
}

/// `disconnect` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectNotice {
    /// Human-readable reason.
    pub reason: String,
}

/// `connect_error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectErrorNotice {
    /// Error description.
    pub message: String,
}

/// `randomTalkMatched` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomMatched {
    /// The matched peer.
    pub user: User,
}

/// Outgoing `randomTalkMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomMessageOut {
    /// Text body.
    pub message: String,
    /// The matched peer.
    pub recipient_id: UserId,
}

/// Incoming `randomTalkMessage` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomMessageIn {
    /// Text body.
    pub message: String,
    /// The peer who sent it.
    pub sender: User,
}

/// Outgoing `randomTalkTyping` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomTypingOut {
    /// Local user.
    pub sender_id: UserId,
    /// The matched peer.
    pub recipient_id: UserId,
    /// Typing started (true) or stopped (false).
    pub is_typing: bool,
}

/// Incoming `randomTalkTyping` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomTypingIn {
    /// The peer.
    pub sender_id: UserId,
    /// Typing started (true) or stopped (false).
    pub is_typing: bool,
}

/// `endRandomTalk` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndRandomTalk {
    /// Local user.
    pub user_id: UserId,
    /// The matched peer.
    pub partner_id: UserId,
}

/// `randomTalkEnded` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomEnded {
    /// Who ended the session.
    #[serde(default)]
    pub ended_by: Option<UserId>,
    /// Why it ended (e.g. "disconnected").
    #[serde(default)]
    pub reason: Option<String>,
}
