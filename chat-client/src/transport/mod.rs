//! Transport abstraction for Parley.
//!
//! This module provides a pluggable transport layer that abstracts
//! the underlying connection mechanism (WebSocket, mock for testing).
//!
//! # Design
//!
//! The transport trait is async and connection-oriented:
//! - `connect()` opens a connection authenticated with a bearer token
//! - `send()` transmits one frame
//! - `recv()` waits for the next frame, or reports why the connection closed
//! - `close()` gracefully terminates
//!
//! Only [`crate::ConnectionManager`] calls these methods.
//!
//! # Example
//!
//! ```ignore
//! let transport = MockTransport::new();
//! transport.connect("ws://localhost:5000", "token").await?;
//! transport.send(&frame).await?;
//! let reply = transport.recv().await?;
//! ```

mod mock;
mod websocket;

pub use mock::MockTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use chat_core::DisconnectCause;
use chat_types::{ChatError, Frame};
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Not connected.
    #[error("not connected")]
    NotConnected,

    /// Connection closed.
    #[error("connection closed ({cause:?}): {reason}")]
    Closed {
        /// Who closed it.
        cause: DisconnectCause,
        /// Reason reported by the peer or the socket.
        reason: String,
    },

    /// Send failed.
    #[error("send failed: {0}")]
    SendFailed(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] ChatError),
}

impl TransportError {
    /// Who closed the connection, if this error means it is gone.
    pub fn disconnect_cause(&self) -> DisconnectCause {
        match self {
            Self::Closed { cause, .. } => *cause,
            _ => DisconnectCause::Transport,
        }
    }
}

/// Transport trait for exchanging protocol frames.
///
/// Implementations handle the underlying connection mechanism
/// (WebSocket, mock, etc).
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to the server at `url`, authenticating with `token`.
    async fn connect(&self, url: &str, token: &str) -> Result<(), TransportError>;

    /// Send one frame over the connection.
    async fn send(&self, frame: &Frame) -> Result<(), TransportError>;

    /// Receive the next frame.
    ///
    /// Blocks until a frame is available or the connection closes. Must be
    /// cancel safe: dropping the future loses no frame.
    async fn recv(&self) -> Result<Frame, TransportError>;

    /// Check if currently connected.
    fn is_connected(&self) -> bool;

    /// Close the connection gracefully.
    async fn close(&self) -> Result<(), TransportError>;
}
