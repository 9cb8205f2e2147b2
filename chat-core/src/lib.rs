//! # chat-core
//!
//! Pure session logic for Parley (no I/O, instant tests).
//!
//! This crate implements the state machines and stores behind a realtime
//! chat session without any network, disk or clock access, enabling fast
//! unit tests.
//!
//! ## Design Philosophy
//!
//! All modules in this crate are **pure** - they take input and produce output
//! without side effects. Time arrives as an argument, timers are requested as
//! actions, and protocol events are requested as return values.
//!
//! The actual I/O (sockets, timers, REST calls) is performed by `chat-client`,
//! which interprets the actions produced by these state machines.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod connection;
pub mod conversations;
pub mod matchmaking;
pub mod merger;
pub mod notifications;
pub mod presence;
pub mod session;
pub mod subscription;
pub mod typing;

pub use connection::{
    ConnectionAction, ConnectionEvent, ConnectionNotice, ConnectionState, DisconnectCause,
    ReconnectPolicy,
};
pub use conversations::{ConversationList, ConversationView};
pub use matchmaking::{
    EndInfo, EndedBy, MatchAction, MatchError, MatchEvent, MatchSession, MatchStatus,
    MatchTrigger, MATCH_DISPLAY_DELAY, TRANSITIONS,
};
pub use merger::{AckOutcome, MessageMerger, OutgoingMessage, RemoteRouting, RECONCILE_WINDOW};
pub use notifications::{NotificationAggregator, NotificationEntry};
pub use presence::{format_last_seen, Presence, PresenceBook};
pub use session::{AuthToken, Session, SessionStatus};
pub use subscription::{SubscriptionAction, SubscriptionTracker};
pub use typing::{
    RemoteTyping, TypingAction, TypingDebouncer, Typist, REMOTE_TYPING_EXPIRY, TYPING_IDLE,
};
