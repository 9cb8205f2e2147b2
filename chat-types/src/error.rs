//! Error types for Parley wire handling.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol data.
#[derive(Debug, Error)]
pub enum ChatError {
    /// JSON (de)serialization failed
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Event name the client does not understand
    #[error("unknown event: {0}")]
    UnknownEvent(String),

    /// Payload does not match the event's shape
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}
