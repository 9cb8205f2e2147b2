//! Connection state machine for Parley.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the lifecycle of the single persistent connection. The state machine
//! takes events as input and produces a new state plus a list of actions to
//! execute.
//!
//! The actual I/O (opening sockets, arming timers) is performed by
//! chat-client, not by this module.

use std::time::Duration;

/// Bounded reconnection policy with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Retries after the initial attempt before giving up.
    pub max_attempts: u32,
    /// Delay before each retry.
    pub delay: Duration,
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Who closed the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The server closed it deliberately; reconnect immediately.
    Server,
    /// The local side closed it; do not reconnect.
    Client,
    /// The network dropped it; reconnect under the policy.
    Transport,
}

impl DisconnectCause {
    /// Classify a disconnect reason string as reported by the relay.
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "io server disconnect" => Self::Server,
            "io client disconnect" => Self::Client,
            _ => Self::Transport,
        }
    }
}

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none wanted.
    Disconnected,
    /// Connection attempt in progress.
    Connecting {
        /// 0 for the first attempt, then the retry number.
        attempt: u32,
    },
    /// Connected; emits are allowed.
    Connected,
    /// Waiting for the reconnect timer.
    Reconnecting {
        /// The retry number the timer will start.
        attempt: u32,
    },
    /// Retries exhausted. A new connect request starts over.
    Failed {
        /// The last error seen.
        error: String,
    },
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (chat-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(
        self,
        event: ConnectionEvent,
        policy: &ReconnectPolicy,
    ) -> (Self, Vec<ConnectionAction>) {
        match (self, event) {
            // A connect request always yields exactly one fresh connection
            (Self::Disconnected | Self::Failed { .. }, ConnectionEvent::ConnectRequested) => {
                (Self::Connecting { attempt: 0 }, vec![ConnectionAction::Connect])
            }
            (_, ConnectionEvent::ConnectRequested) => (
                Self::Connecting { attempt: 0 },
                vec![
                    ConnectionAction::CancelReconnect,
                    ConnectionAction::Close,
                    ConnectionAction::Connect,
                ],
            ),

            // From Connecting
            (Self::Connecting { .. }, ConnectionEvent::Established) => (
                Self::Connected,
                vec![
                    ConnectionAction::SendSetup,
                    ConnectionAction::Notify(ConnectionNotice::Connected),
                ],
            ),
            (Self::Connecting { attempt }, ConnectionEvent::ConnectFailed { error })
            | (
                Self::Connecting { attempt },
                ConnectionEvent::Lost {
                    reason: error,
                    cause: DisconnectCause::Transport | DisconnectCause::Server,
                },
            ) => retry_or_fail(attempt, error, policy),

            // From Connected
            // The server refused the handshake after the socket opened.
            (Self::Connected, ConnectionEvent::ConnectFailed { error }) => (
                Self::Failed {
                    error: error.clone(),
                },
                vec![
                    ConnectionAction::Close,
                    ConnectionAction::Notify(ConnectionNotice::Rejected { error }),
                ],
            ),
            (Self::Connected, ConnectionEvent::Lost { cause, reason }) => {
                let notice = ConnectionAction::Notify(ConnectionNotice::Lost {
                    cause,
                    reason: reason.clone(),
                });
                match cause {
                    DisconnectCause::Server => (
                        Self::Connecting { attempt: 0 },
                        vec![notice, ConnectionAction::Connect],
                    ),
                    DisconnectCause::Transport => (
                        Self::Reconnecting { attempt: 1 },
                        vec![
                            notice,
                            ConnectionAction::StartReconnectTimer {
                                delay: policy.delay,
                            },
                        ],
                    ),
                    DisconnectCause::Client => (Self::Disconnected, vec![notice]),
                }
            }

            // From Reconnecting
            (Self::Reconnecting { attempt }, ConnectionEvent::ReconnectTimer) => {
                (Self::Connecting { attempt }, vec![ConnectionAction::Connect])
            }

            // Explicit teardown from anywhere
            (Self::Disconnected, ConnectionEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![])
            }
            (Self::Failed { .. }, ConnectionEvent::DisconnectRequested) => {
                (Self::Disconnected, vec![])
            }
            (_, ConnectionEvent::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    ConnectionAction::CancelReconnect,
                    ConnectionAction::Close,
                    ConnectionAction::Notify(ConnectionNotice::Disconnected),
                ],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if currently trying to connect.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Reconnecting { .. })
    }

    /// Check if retries were exhausted.
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::new()
    }
}

fn retry_or_fail(
    attempt: u32,
    error: String,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<ConnectionAction>) {
    if attempt >= policy.max_attempts {
        return (
            ConnectionState::Failed {
                error: error.clone(),
            },
            vec![ConnectionAction::Notify(
                ConnectionNotice::ReconnectExhausted {
                    attempts: attempt,
                    error,
                },
            )],
        );
    }
    let next = attempt.saturating_add(1);
    (
        ConnectionState::Reconnecting { attempt: next },
        vec![
            ConnectionAction::Notify(ConnectionNotice::ConnectFailed { attempt, error }),
            ConnectionAction::StartReconnectTimer {
                delay: policy.delay,
            },
        ],
    )
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller asked for a connection.
    ConnectRequested,
    /// Transport connection succeeded.
    Established,
    /// Transport connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// An open connection went away.
    Lost {
        /// Who closed it.
        cause: DisconnectCause,
        /// Reason reported by the transport.
        reason: String,
    },
    /// Caller asked for teardown.
    DisconnectRequested,
    /// Reconnect timer fired.
    ReconnectTimer,
}

/// Actions to be executed by chat-client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open the transport.
    Connect,
    /// Close the transport.
    Close,
    /// Send the `setup` handshake event.
    SendSetup,
    /// Arm the reconnect timer.
    StartReconnectTimer {
        /// Delay before the next attempt.
        delay: Duration,
    },
    /// Disarm any pending reconnect timer.
    CancelReconnect,
    /// Report a transition to the session.
    Notify(ConnectionNotice),
}

/// Transitions reported to the session layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionNotice {
    /// The connection is usable.
    Connected,
    /// An attempt failed; another one is scheduled.
    ConnectFailed {
        /// Which attempt failed (0 = initial).
        attempt: u32,
        /// Error message.
        error: String,
    },
    /// An open connection was lost.
    Lost {
        /// Who closed it.
        cause: DisconnectCause,
        /// Reason reported by the transport.
        reason: String,
    },
    /// The retry budget is spent; the connection is reported as failed.
    ReconnectExhausted {
        /// Retries made.
        attempts: u32,
        /// The last error seen.
        error: String,
    },
    /// The server refused the session; no retry is scheduled.
    Rejected {
        /// Reason given by the server.
        error: String,
    },
    /// Closed on request.
    Disconnected,
}
