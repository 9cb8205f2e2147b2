//! Top-level client error.

use chat_types::ChatError;
use thiserror::Error;

use crate::api::ApiError;
use crate::store::StoreError;
use crate::transport::TransportError;

/// Errors surfaced by chat-client entry points.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// REST failure.
    #[error("api error: {0}")]
    Api(#[from] ApiError),

    /// Token store failure.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Protocol encode/decode failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ChatError),

    /// The session loop has shut down.
    #[error("session closed")]
    SessionClosed,
}
