//! # chat-types
//!
//! Wire format types for the Parley realtime chat protocol.
//!
//! This crate provides the foundational types used across all Parley crates:
//! - [`UserId`], [`ConversationId`], [`MessageId`], [`LocalId`], [`AckId`] - Identity types
//! - [`User`], [`Conversation`], [`Message`], [`Notification`] - Domain records
//! - [`Outbound`], [`Inbound`] - Protocol events
//! - [`Frame`] - JSON text frame carried by the transport
//! - [`ChatError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frame;
mod ids;
mod models;
pub mod protocol;

pub use error::ChatError;
pub use frame::Frame;
pub use ids::{AckId, ConversationId, LocalId, MessageId, UserId};
pub use models::{
    Conversation, ConversationRef, DeliveryState, Message, Notification, OnlineStatus,
    TransientMessage, User,
};
pub use protocol::{Inbound, Outbound};
