//! The connection manager: the only owner of the transport.
//!
//! [`ConnectionManager`] drives the pure [`ConnectionState`] machine from
//! chat-core and executes its actions against a [`Transport`]. Everything
//! that needs a clock (the reconnect delay) is handed back to the caller as
//! a [`ConnectionOutput`], so the manager itself never sleeps.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chat_core::{
    ConnectionAction, ConnectionEvent, ConnectionNotice, ConnectionState, ReconnectPolicy, Session,
};
use chat_types::{AckId, ConversationId, LocalId, Outbound, User};
use serde_json::Value;

use crate::transport::{Transport, TransportError};

/// What an outstanding acknowledgement is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AckPurpose {
    /// A `new message` send.
    SendMessage {
        /// The optimistic entry.
        local_id: LocalId,
        /// Conversation captured at send time.
        conversation: ConversationId,
    },
    /// A `getUserStatus` pull.
    UserStatus {
        /// Conversation whose counterpart was asked about.
        conversation: ConversationId,
    },
    /// A `clearNotifications` request.
    ClearNotifications {
        /// Conversation being cleared.
        conversation: ConversationId,
    },
}

/// Outstanding acknowledgements keyed by ack id.
#[derive(Debug, Default)]
pub struct AckRegistry {
    pending: HashMap<AckId, AckPurpose>,
    next: AckId,
}

impl AckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate an id for `purpose`.
    pub fn register(&mut self, purpose: AckPurpose) -> AckId {
        self.next = self.next.next();
        let id = self.next;
        self.pending.insert(id, purpose);
        id
    }

    /// Take the purpose of a reply. `None` for unknown or already settled ids.
    pub fn resolve(&mut self, id: AckId) -> Option<AckPurpose> {
        self.pending.remove(&id)
    }

    /// Fail everything outstanding.
    pub fn drain(&mut self) -> Vec<(AckId, AckPurpose)> {
        let mut drained: Vec<_> = self.pending.drain().collect();
        drained.sort_by_key(|(id, _)| *id);
        drained
    }

    /// Number of outstanding acknowledgements.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is outstanding.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Work for the caller after a connection transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionOutput {
    /// Report this transition.
    Notice(ConnectionNotice),
    /// Schedule [`ConnectionManager::on_reconnect_timer`] after `delay`.
    ArmReconnect(Duration),
    /// Drop any scheduled reconnect.
    CancelReconnect,
    /// These acknowledgements will never arrive.
    AcksFailed(Vec<(AckId, AckPurpose)>),
}

/// Owns the single connection of a session.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    url: String,
    policy: ReconnectPolicy,
    state: ConnectionState,
    user: Option<User>,
    token: String,
    acks: AckRegistry,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager that will connect to `url`.
    pub fn new(transport: T, url: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            url: url.into(),
            policy,
            state: ConnectionState::new(),
            user: None,
            token: String::new(),
            acks: AckRegistry::new(),
        }
    }

    /// The transport, for receiving frames.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current connection state.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// True if emits will be sent.
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Outstanding acknowledgements.
    pub fn pending_acks(&self) -> usize {
        self.acks.len()
    }

    /// Open a connection for `session`, tearing down any existing one first.
    pub async fn connect(&mut self, session: &Session) -> Vec<ConnectionOutput> {
        self.user = Some(session.user.clone());
        self.token = session.token.expose().to_string();
        self.drive(ConnectionEvent::ConnectRequested).await
    }

    /// Close the connection and stop reconnecting.
    pub async fn disconnect(&mut self) -> Vec<ConnectionOutput> {
        self.drive(ConnectionEvent::DisconnectRequested).await
    }

    /// The reconnect timer fired.
    pub async fn on_reconnect_timer(&mut self) -> Vec<ConnectionOutput> {
        self.drive(ConnectionEvent::ReconnectTimer).await
    }

    /// The transport reported an error while receiving.
    pub async fn on_transport_error(&mut self, error: TransportError) -> Vec<ConnectionOutput> {
        let cause = error.disconnect_cause();
        let reason = match error {
            TransportError::Closed { reason, .. } => reason,
            other => other.to_string(),
        };
        self.drive(ConnectionEvent::Lost { cause, reason }).await
    }

    /// The server reported a connect error.
    pub async fn on_connect_error(&mut self, message: String) -> Vec<ConnectionOutput> {
        self.drive(ConnectionEvent::ConnectFailed { error: message })
            .await
    }

    /// Send an event if connected.
    ///
    /// Returns false (after logging a warning) when offline or when the send
    /// fails. Never queues.
    pub async fn emit(&self, event: Outbound) -> bool {
        let name = event.name();
        if !self.state.is_connected() {
            tracing::warn!("not connected, dropping {} emit", name);
            return false;
        }
        let frame = match event.into_frame(None) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("failed to encode {}: {}", name, e);
                return false;
            }
        };
        match self.transport.send(&frame).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("failed to send {}: {}", name, e);
                false
            }
        }
    }

    /// Send an event that requests an acknowledgement.
    ///
    /// Returns the ack id to wait for, or `None` if nothing was sent.
    pub async fn emit_with_ack(&mut self, event: Outbound, purpose: AckPurpose) -> Option<AckId> {
        let name = event.name();
        if !self.state.is_connected() {
            tracing::warn!("not connected, dropping {} emit", name);
            return None;
        }
        let id = self.acks.register(purpose);
        let sent = match event.into_frame(Some(id)) {
            Ok(frame) => self.transport.send(&frame).await.map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        if let Err(e) = sent {
            tracing::warn!("failed to send {}: {}", name, e);
            self.acks.resolve(id);
            return None;
        }
        Some(id)
    }

    /// Match an ack reply to its request.
    pub fn resolve_ack(&mut self, id: AckId, data: Value) -> Option<(AckPurpose, Value)> {
        match self.acks.resolve(id) {
            Some(purpose) => Some((purpose, data)),
            None => {
                tracing::debug!("ignoring ack {} with no pending request", id);
                None
            }
        }
    }

    /// Give up on an acknowledgement.
    pub fn expire_ack(&mut self, id: AckId) -> Option<AckPurpose> {
        self.acks.resolve(id)
    }

    async fn drive(&mut self, event: ConnectionEvent) -> Vec<ConnectionOutput> {
        let mut outputs = Vec::new();
        let mut events = VecDeque::from([event]);

        while let Some(event) = events.pop_front() {
            let (state, actions) = std::mem::take(&mut self.state).on_event(event, &self.policy);
            self.state = state;

            for action in actions {
                match action {
                    ConnectionAction::Connect => {
                        match self.transport.connect(&self.url, &self.token).await {
                            Ok(()) => events.push_back(ConnectionEvent::Established),
                            Err(e) => events.push_back(ConnectionEvent::ConnectFailed {
                                error: e.to_string(),
                            }),
                        }
                    }
                    ConnectionAction::Close => {
                        if let Err(e) = self.transport.close().await {
                            tracing::debug!("error closing transport: {}", e);
                        }
                        self.fail_acks(&mut outputs);
                    }
                    ConnectionAction::SendSetup => {
                        if let Some(user) = self.user.clone() {
                            self.emit(Outbound::Setup(user)).await;
                        }
                    }
                    ConnectionAction::StartReconnectTimer { delay } => {
                        outputs.push(ConnectionOutput::ArmReconnect(delay));
                    }
                    ConnectionAction::CancelReconnect => {
                        outputs.push(ConnectionOutput::CancelReconnect);
                    }
                    ConnectionAction::Notify(notice) => {
                        log_notice(&notice);
                        if matches!(notice, ConnectionNotice::Lost { .. }) {
                            self.fail_acks(&mut outputs);
                        }
                        outputs.push(ConnectionOutput::Notice(notice));
                    }
                }
            }
        }
        outputs
    }

    fn fail_acks(&mut self, outputs: &mut Vec<ConnectionOutput>) {
        let drained = self.acks.drain();
        if !drained.is_empty() {
            outputs.push(ConnectionOutput::AcksFailed(drained));
        }
    }
}

fn log_notice(notice: &ConnectionNotice) {
    match notice {
        ConnectionNotice::Connected => tracing::info!("connected"),
        ConnectionNotice::ConnectFailed { attempt, error } => {
            tracing::warn!("connect attempt {} failed: {}", attempt, error)
        }
        ConnectionNotice::Lost { cause, reason } => {
            tracing::warn!("connection lost ({:?}): {}", cause, reason)
        }
        ConnectionNotice::ReconnectExhausted { attempts, error } => {
            tracing::warn!("giving up after {} retries: {}", attempts, error)
        }
        ConnectionNotice::Rejected { error } => tracing::warn!("server refused session: {}", error),
        ConnectionNotice::Disconnected => tracing::info!("disconnected"),
    }
}
