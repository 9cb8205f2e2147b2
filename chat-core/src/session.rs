//! The authenticated session and its connection status.

use std::fmt;

use chat_types::User;

use crate::connection::{ConnectionNotice, DisconnectCause};

/// Bearer token proving the user's identity to the server.
///
/// Never printed: `Debug` redacts the value.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token, for the `Authorization` header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken([redacted])")
    }
}

/// Connection status as the UI sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionStatus {
    /// Not connected.
    #[default]
    Disconnected,
    /// Connecting or waiting to retry.
    Connecting,
    /// Connected.
    Connected,
    /// Gave up; see `last_error`.
    Error,
}

/// The single authenticated session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The logged-in user.
    pub user: User,
    /// Credential for the connection and the REST API.
    pub token: AuthToken,
    /// Current connection status.
    pub status: SessionStatus,
    /// Most recent connection error.
    pub last_error: Option<String>,
}

impl Session {
    /// Create a disconnected session.
    pub fn new(user: User, token: AuthToken) -> Self {
        Self {
            user,
            token,
            status: SessionStatus::Disconnected,
            last_error: None,
        }
    }

    /// Mark a connection attempt as started.
    pub fn connecting(&mut self) {
        self.status = SessionStatus::Connecting;
    }

    /// Fold a connection transition into the status fields.
    pub fn apply(&mut self, notice: &ConnectionNotice) {
        match notice {
            ConnectionNotice::Connected => {
                self.status = SessionStatus::Connected;
                self.last_error = None;
            }
            ConnectionNotice::ConnectFailed { error, .. } => {
                self.status = SessionStatus::Connecting;
                self.last_error = Some(error.clone());
            }
            ConnectionNotice::Lost { cause, reason } => {
                self.status = match cause {
                    DisconnectCause::Client => SessionStatus::Disconnected,
                    _ => SessionStatus::Connecting,
                };
                self.last_error = Some(reason.clone());
            }
            ConnectionNotice::ReconnectExhausted { error, .. }
            | ConnectionNotice::Rejected { error } => {
                self.status = SessionStatus::Error;
                self.last_error = Some(error.clone());
            }
            ConnectionNotice::Disconnected => {
                self.status = SessionStatus::Disconnected;
            }
        }
    }

    /// True if events can be emitted right now.
    pub fn is_connected(&self) -> bool {
        self.status == SessionStatus::Connected
    }
}
