//! The session event loop.
//!
//! [`ChatSession`] owns every store of a logged-in client and is the only
//! place where they change. One `tokio::select!` multiplexes four sources:
//!
//! - frames from the transport (only while connected)
//! - [`Intent`]s sent by the UI through a [`SessionHandle`]
//! - expired [`Timers`]
//! - completions of REST requests running in spawned tasks
//!
//! Each input is handled to completion before the next one is polled, so
//! the stores never observe a half-applied event. The UI reads through the
//! selector methods and listens for [`SessionEvent`]s.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chat_core::{
    AckOutcome, ConnectionNotice, ConnectionState, ConversationList, ConversationView,
    DisconnectCause, MatchAction, MatchEvent, MatchSession, MatchStatus, MessageMerger,
    NotificationAggregator, NotificationEntry, OutgoingMessage, PresenceBook, RemoteRouting,
    RemoteTyping, Session, SubscriptionAction, SubscriptionTracker, TypingAction,
    TypingDebouncer, Typist,
};
use chat_types::protocol::{
    self, MessageReceipt, NotificationRequest, RandomMessageOut, RandomTypingOut, TypingSignal,
    UserStatusReply, UserTarget,
};
use chat_types::{
    Conversation, ConversationId, Frame, Inbound, LocalId, Message, MessageId, Notification,
    Outbound, TransientMessage, UserId,
};
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::api::{ApiError, ChatApi};
use crate::config::ClientConfig;
use crate::connection::{AckPurpose, ConnectionManager, ConnectionOutput};
use crate::error::ClientError;
use crate::timers::{Timer, TimerKind, Timers};
use crate::transport::{Transport, TransportError};

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 256;

/// Something the user asked for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// (Re)connect with the current session.
    Connect,
    /// Close the connection and stop reconnecting.
    Disconnect,
    /// Make a conversation active (`None` closes the view).
    SelectConversation(Option<ConversationId>),
    /// Send a message to the active conversation.
    SendMessage(String),
    /// Retry a failed or never-sent message.
    Resend(LocalId),
    /// A keystroke in the active conversation's input.
    Keystroke,
    /// Open (or create) a one-to-one conversation and select it.
    OpenConversation(UserId),
    /// Re-fetch the conversation list.
    RefreshConversations,
    /// Dismiss all unread counters locally.
    DismissNotifications,
    /// Ask the server for a random partner.
    RequestMatch,
    /// Stop searching.
    CancelMatch,
    /// End the random chat.
    EndMatch,
    /// Leave the ended random chat.
    ExitMatch,
    /// Send a message to the random partner.
    SendRandom(String),
    /// A keystroke in the random chat input.
    RandomKeystroke,
    /// Disconnect and stop the loop.
    Shutdown,
}

/// Something the UI may want to redraw for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Connection transition.
    Connection(ConnectionNotice),
    /// The server finished the `setup` handshake.
    Ready,
    /// The conversation list changed.
    ConversationsUpdated,
    /// The active conversation changed.
    ConversationSelected(Option<ConversationId>),
    /// History for the active conversation arrived.
    HistoryLoaded(ConversationId),
    /// A message was pushed by the server.
    MessageReceived(Message),
    /// One of our messages was acknowledged.
    MessageDelivered {
        /// The optimistic entry.
        local_id: LocalId,
        /// The server's copy.
        message: Message,
    },
    /// One of our messages could not be delivered.
    MessageFailed {
        /// The optimistic entry.
        local_id: LocalId,
        /// Conversation it was sent to.
        conversation: ConversationId,
    },
    /// Unread counters changed.
    NotificationsUpdated {
        /// New badge total.
        total: u32,
    },
    /// Remote typing state of a conversation changed.
    TypingChanged {
        /// Which conversation.
        conversation: ConversationId,
        /// Whether anyone is typing now.
        typing: bool,
    },
    /// Presence of a conversation's counterpart changed.
    PresenceChanged(ConversationId),
    /// Random talk moved to a new status.
    MatchChanged(MatchStatus),
    /// A random talk message was added.
    RandomMessage(TransientMessage),
    /// The random partner started or stopped typing.
    PeerTyping(bool),
    /// A REST request failed.
    RequestFailed(String),
}

/// Sends intents into a running [`ChatSession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    intents: mpsc::UnboundedSender<Intent>,
}

impl SessionHandle {
    /// Queue an intent.
    pub fn send(&self, intent: Intent) -> Result<(), ClientError> {
        self.intents
            .send(intent)
            .map_err(|_| ClientError::SessionClosed)
    }
}

enum Completion {
    Conversations(Result<Vec<Conversation>, ApiError>),
    Notifications(Result<Vec<Notification>, ApiError>),
    History {
        conversation: ConversationId,
        result: Result<Vec<Message>, ApiError>,
    },
    Opened(Result<Conversation, ApiError>),
}

enum Input {
    Frame(Result<Frame, TransportError>),
    Intent(Intent),
    Timer(Timer),
    Completion(Completion),
}

/// A logged-in chat client.
pub struct ChatSession<T: Transport, A: ChatApi> {
    config: ClientConfig,
    session: Session,
    connection: ConnectionManager<T>,
    api: Arc<A>,

    subscription: SubscriptionTracker,
    merger: MessageMerger,
    conversations: ConversationList,
    notifications: NotificationAggregator,
    typing: TypingDebouncer<ConversationId>,
    remote_typing: RemoteTyping,
    presence: PresenceBook,
    matchmaking: MatchSession,
    random_typing: TypingDebouncer<UserId>,

    /// Sent messages awaiting their acknowledgement.
    in_flight: HashMap<LocalId, Message>,
    refreshing_conversations: bool,
    timers: Timers,

    intents_tx: mpsc::UnboundedSender<Intent>,
    intents_rx: mpsc::UnboundedReceiver<Intent>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    events: broadcast::Sender<SessionEvent>,
    running: bool,
}

impl<T: Transport, A: ChatApi> ChatSession<T, A> {
    /// Create a session. Nothing happens until [`start`](Self::start).
    pub fn new(config: ClientConfig, session: Session, transport: T, api: A) -> Self {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let connection = ConnectionManager::new(transport, &config.server_url, config.reconnect);

        Self {
            subscription: SubscriptionTracker::new(),
            merger: MessageMerger::new(),
            conversations: ConversationList::new(),
            notifications: NotificationAggregator::new(),
            typing: TypingDebouncer::with_idle(config.typing_idle),
            remote_typing: RemoteTyping::with_expiry(config.remote_typing_expiry),
            presence: PresenceBook::new(),
            matchmaking: MatchSession::with_display_delay(config.match_display_delay),
            random_typing: TypingDebouncer::with_idle(config.typing_idle),
            in_flight: HashMap::new(),
            refreshing_conversations: false,
            timers: Timers::new(),
            intents_tx,
            intents_rx,
            completions_tx,
            completions_rx,
            events,
            running: true,
            connection,
            session,
            api: Arc::new(api),
            config,
        }
    }

    /// A handle for sending intents.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            intents: self.intents_tx.clone(),
        }
    }

    /// Listen for session events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ===========================================
    // Selectors
    // ===========================================

    /// The authenticated session.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Current connection state.
    pub fn connection_state(&self) -> &ConnectionState {
        self.connection.state()
    }

    /// Conversations, most recent first, with their unread counts.
    pub fn conversations(&self) -> Vec<ConversationView<'_>> {
        self.conversations
            .views(&self.notifications, &self.session.user.id)
    }

    /// The active conversation.
    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.subscription.active()
    }

    /// Messages of the active conversation, in display order.
    pub fn messages(&self) -> &[Message] {
        self.merger.messages()
    }

    /// Unread counters.
    pub fn notifications(&self) -> &[NotificationEntry] {
        self.notifications.entries()
    }

    /// Unread count for one conversation.
    pub fn unseen_count(&self, conversation: &ConversationId) -> u32 {
        self.notifications.unseen_count(conversation)
    }

    /// Sum of all unread counts.
    pub fn total_badge_count(&self) -> u32 {
        self.notifications.total()
    }

    /// Header line of the active conversation in local time.
    pub fn status_line(&self) -> Option<String> {
        self.status_line_in(&chrono::Local)
    }

    /// Header line of the active conversation in the given time zone.
    pub fn status_line_in<Tz>(&self, tz: &Tz) -> Option<String>
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let active = self.subscription.active()?;
        self.presence
            .status_line(active, self.remote_typing.is_typing(active), tz)
    }

    /// The random talk session.
    pub fn match_session(&self) -> &MatchSession {
        &self.matchmaking
    }

    // ===========================================
    // Loop
    // ===========================================

    /// Connect and load the conversation list.
    pub async fn start(&mut self) {
        self.connect().await;
        self.fetch_conversations();
    }

    /// Handle one input. Returns false once the session has shut down.
    ///
    /// Not cancel safe: once an input is taken, dropping the future can
    /// leave its handler half applied. Do not race it in a `select!`; read
    /// events with `try_recv` after it returns.
    pub async fn step(&mut self) -> bool {
        if !self.running {
            return false;
        }
        let listening = self.connection.is_connected();
        let timers_armed = !self.timers.is_empty();

        let input = tokio::select! {
            frame = self.connection.transport().recv(), if listening => Input::Frame(frame),
            Some(intent) = self.intents_rx.recv() => Input::Intent(intent),
            Some(timer) = self.timers.next(), if timers_armed => Input::Timer(timer),
            Some(done) = self.completions_rx.recv() => Input::Completion(done),
        };

        match input {
            Input::Frame(frame) => self.handle_frame(frame).await,
            Input::Intent(intent) => self.handle_intent(intent).await,
            Input::Timer(timer) => self.handle_timer(timer).await,
            Input::Completion(done) => self.handle_completion(done).await,
        }
        self.running
    }

    /// Start and process inputs until [`Intent::Shutdown`].
    pub async fn run(&mut self) {
        self.start().await;
        while self.step().await {}
    }

    /// Stop typing, close the connection and drop every timer.
    pub async fn shutdown(&mut self) {
        if let Some(active) = self.subscription.active().cloned() {
            let actions = self.typing.cancel(&active);
            self.run_typing(actions).await;
        }
        let outputs = self.connection.disconnect().await;
        self.apply_connection(outputs).await;
        self.timers.clear();
        self.running = false;
    }

    fn publish(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }

    // ===========================================
    // Connection
    // ===========================================

    async fn connect(&mut self) {
        self.session.connecting();
        let outputs = self.connection.connect(&self.session).await;
        self.apply_connection(outputs).await;
    }

    async fn apply_connection(&mut self, outputs: Vec<ConnectionOutput>) {
        for output in outputs {
            match output {
                ConnectionOutput::Notice(notice) => {
                    self.session.apply(&notice);
                    self.publish(SessionEvent::Connection(notice.clone()));
                    match notice {
                        ConnectionNotice::Connected => self.on_connected().await,
                        ConnectionNotice::ConnectFailed { .. } => {}
                        ConnectionNotice::Lost { .. }
                        | ConnectionNotice::ReconnectExhausted { .. }
                        | ConnectionNotice::Rejected { .. }
                        | ConnectionNotice::Disconnected => self.on_connection_down().await,
                    }
                }
                ConnectionOutput::ArmReconnect(delay) => {
                    self.timers.arm(TimerKind::Reconnect, delay, 0);
                }
                ConnectionOutput::CancelReconnect => {
                    self.timers.cancel(&TimerKind::Reconnect);
                }
                ConnectionOutput::AcksFailed(failed) => {
                    for (id, purpose) in failed {
                        self.timers.cancel(&TimerKind::Ack(id));
                        self.settle_ack(purpose, None);
                    }
                }
            }
        }
    }

    async fn on_connected(&mut self) {
        let actions = self.subscription.on_connected();
        self.run_subscription(actions).await;
        self.fetch_notifications();
        if let Some(active) = self.subscription.active().cloned() {
            self.request_status(active).await;
        }
        let actions = self.matchmaking.on_reconnected();
        self.run_match(actions).await;
    }

    async fn on_connection_down(&mut self) {
        self.subscription.on_disconnected();
        if let Some(active) = self.subscription.active().cloned() {
            self.timers.cancel(&TimerKind::RemoteTyping(active.clone()));
            if self.remote_typing.is_typing(&active) {
                self.remote_typing.clear(&active);
                self.publish(SessionEvent::TypingChanged {
                    conversation: active,
                    typing: false,
                });
            }
        }
        if self.matchmaking.ends_on_connection_loss() {
            self.apply_match(MatchEvent::ConnectionLost).await;
        }
    }

    /// Emit an event that expects an acknowledgement and arm its timeout.
    async fn request(&mut self, event: Outbound, purpose: AckPurpose) -> bool {
        match self.connection.emit_with_ack(event, purpose).await {
            Some(id) => {
                self.timers
                    .arm(TimerKind::Ack(id), self.config.ack_timeout, 0);
                true
            }
            None => false,
        }
    }

    async fn request_status(&mut self, conversation: ConversationId) {
        let purpose = AckPurpose::UserStatus {
            conversation: conversation.clone(),
        };
        self.request(Outbound::GetUserStatus(conversation.into()), purpose)
            .await;
    }

    async fn request_clear(&mut self, conversation: ConversationId) {
        if !self.notifications.request_clear(&conversation) {
            return;
        }
        let purpose = AckPurpose::ClearNotifications {
            conversation: conversation.clone(),
        };
        if !self
            .request(
                Outbound::ClearNotifications(conversation.clone().into()),
                purpose,
            )
            .await
        {
            self.notifications.abort_clear(&conversation);
        }
    }

    // ===========================================
    // Inbound
    // ===========================================

    async fn handle_frame(&mut self, frame: Result<Frame, TransportError>) {
        match frame {
            Ok(Frame::Event { event, data, .. }) => match Inbound::from_parts(&event, data) {
                Ok(inbound) => self.handle_inbound(inbound).await,
                Err(e) => tracing::debug!("ignoring {} event: {}", event, e),
            },
            Ok(Frame::Ack { ack, data }) => {
                self.timers.cancel(&TimerKind::Ack(ack));
                if let Some((purpose, data)) = self.connection.resolve_ack(ack, data) {
                    self.settle_ack(purpose, Some(data));
                }
            }
            Err(error) => {
                let outputs = self.connection.on_transport_error(error).await;
                self.apply_connection(outputs).await;
            }
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Connected => {
                tracing::debug!("setup acknowledged");
                self.publish(SessionEvent::Ready);
            }
            Inbound::NewMessage(message) => self.on_new_message(message).await,
            Inbound::NewNotification(notification) => {
                self.notifications.apply(notification);
                if !self.notifications.unresolved(&self.conversations).is_empty() {
                    self.fetch_conversations();
                }
                self.publish(SessionEvent::NotificationsUpdated {
                    total: self.notifications.total(),
                });
            }
            Inbound::Typing(signal) => self.on_remote_typing(signal),
            Inbound::StopTyping(signal) => self.on_remote_stop_typing(signal),
            Inbound::UserStatus(update) => {
                let conversation = update.conversation_id;
                if self
                    .presence
                    .apply(conversation.clone(), update.status, update.last_seen_at)
                {
                    self.publish(SessionEvent::PresenceChanged(conversation));
                }
            }
            Inbound::Disconnect(notice) => {
                let error = TransportError::Closed {
                    cause: DisconnectCause::from_reason(&notice.reason),
                    reason: notice.reason,
                };
                let outputs = self.connection.on_transport_error(error).await;
                self.apply_connection(outputs).await;
            }
            Inbound::ConnectError(notice) => {
                let outputs = self.connection.on_connect_error(notice.message).await;
                self.apply_connection(outputs).await;
            }
            Inbound::RandomTalkMatched(matched) => {
                self.apply_match(MatchEvent::PeerFound(matched.user)).await;
            }
            Inbound::RandomTalkMessage(incoming) => {
                if self
                    .matchmaking
                    .on_peer_message(incoming.sender, incoming.message, Utc::now())
                {
                    if let Some(message) = self.matchmaking.transient_messages().last() {
                        self.publish(SessionEvent::RandomMessage(message.clone()));
                    }
                } else {
                    tracing::debug!("ignoring random talk message outside a chat");
                }
            }
            Inbound::RandomTalkTyping(signal) => {
                if self.matchmaking.chat_peer() == Some(&signal.sender_id)
                    && self.matchmaking.on_peer_typing(signal.is_typing)
                {
                    self.publish(SessionEvent::PeerTyping(signal.is_typing));
                }
            }
            Inbound::RandomTalkEnded(ended) => {
                self.apply_match(MatchEvent::RemoteEnd {
                    ended_by: ended.ended_by,
                    reason: ended.reason,
                })
                .await;
            }
        }
    }

    async fn on_new_message(&mut self, message: Message) {
        if let Some(id) = message.id.clone() {
            self.connection
                .emit(Outbound::MessageReceivedAck(MessageReceipt { message_id: id }))
                .await;
        }
        if !self.conversations.update_latest(&message) {
            self.fetch_conversations();
        }

        let me = self.session.user.id.clone();
        match self.merger.on_remote(message.clone(), &me) {
            RemoteRouting::Appended => self.publish(SessionEvent::MessageReceived(message)),
            RemoteRouting::Duplicate => {
                tracing::debug!("dropping duplicate message {:?}", message.id);
            }
            RemoteRouting::Reconciled(local_id) => {
                tracing::debug!("echo reconciled with {}", local_id);
            }
            RemoteRouting::Notify(message) => {
                if !message.is_from(&me) {
                    let request = NotificationRequest {
                        recipient: me,
                        conversation_id: message.conversation_id.clone(),
                        message: message.clone(),
                    };
                    self.connection
                        .emit(Outbound::AddNotification(request))
                        .await;
                }
                self.publish(SessionEvent::MessageReceived(message));
            }
        }
    }

    fn on_remote_typing(&mut self, signal: TypingSignal) {
        if signal.user_id.as_ref() == Some(&self.session.user.id) {
            return;
        }
        let conversation = signal.conversation_id;
        let was_typing = self.remote_typing.is_typing(&conversation);
        let expiry = self
            .remote_typing
            .on_typing(conversation.clone(), Typist::from(signal.user_id));
        self.timers
            .arm(TimerKind::RemoteTyping(conversation.clone()), expiry, 0);
        if !was_typing {
            self.publish(SessionEvent::TypingChanged {
                conversation,
                typing: true,
            });
        }
    }

    fn on_remote_stop_typing(&mut self, signal: TypingSignal) {
        let conversation = signal.conversation_id;
        let was_typing = self.remote_typing.is_typing(&conversation);
        let typist = Typist::from(signal.user_id);
        if self.remote_typing.on_stop(&conversation, &typist) {
            self.timers
                .cancel(&TimerKind::RemoteTyping(conversation.clone()));
            if was_typing {
                self.publish(SessionEvent::TypingChanged {
                    conversation,
                    typing: false,
                });
            }
        }
    }

    fn settle_ack(&mut self, purpose: AckPurpose, data: Option<Value>) {
        match purpose {
            AckPurpose::SendMessage {
                local_id,
                conversation,
            } => {
                let pending = self.in_flight.remove(&local_id);
                let stored = data.and_then(|d| stored_copy(d, pending.as_ref()));
                let failed = stored.is_none();

                // An echo may already have delivered it.
                if failed {
                    if let Some(message) = self.merger.find(local_id).filter(|m| m.id.is_some()) {
                        let message = message.clone();
                        self.publish(SessionEvent::MessageDelivered { local_id, message });
                        return;
                    }
                }

                match self.merger.on_ack(local_id, conversation, stored) {
                    AckOutcome::Delivered { message, .. } => {
                        self.conversations.update_latest(&message);
                        self.publish(SessionEvent::MessageDelivered { local_id, message });
                    }
                    AckOutcome::Failed {
                        conversation,
                        local_id,
                    } => {
                        tracing::warn!("message {} to {} was not delivered", local_id, conversation);
                        self.publish(SessionEvent::MessageFailed {
                            local_id,
                            conversation,
                        });
                    }
                }
            }
            AckPurpose::UserStatus { conversation } => {
                let reply = data.and_then(|d| serde_json::from_value::<UserStatusReply>(d).ok());
                match reply.and_then(|r| r.status.map(|status| (status, r.last_seen_at))) {
                    Some((status, last_seen)) => {
                        if self.presence.apply(conversation.clone(), status, last_seen) {
                            self.publish(SessionEvent::PresenceChanged(conversation));
                        }
                    }
                    None => tracing::debug!("no status for {}", conversation),
                }
            }
            AckPurpose::ClearNotifications { conversation } => {
                let success = data
                    .and_then(|d| serde_json::from_value::<protocol::ClearReply>(d).ok())
                    .is_some_and(|r| r.success);
                if success {
                    self.notifications.confirm_clear(&conversation);
                    self.publish(SessionEvent::NotificationsUpdated {
                        total: self.notifications.total(),
                    });
                } else {
                    tracing::debug!("clearing {} was not confirmed", conversation);
                    self.notifications.abort_clear(&conversation);
                }
            }
        }
    }

    // ===========================================
    // Intents
    // ===========================================

    async fn handle_intent(&mut self, intent: Intent) {
        match intent {
            Intent::Connect => self.connect().await,
            Intent::Disconnect => {
                let outputs = self.connection.disconnect().await;
                self.apply_connection(outputs).await;
            }
            Intent::SelectConversation(next) => self.select_conversation(next).await,
            Intent::SendMessage(body) => self.send_message(body).await,
            Intent::Resend(local_id) => {
                if self.in_flight.contains_key(&local_id) {
                    tracing::debug!("{} is still awaiting its ack", local_id);
                    return;
                }
                match self.merger.resend(local_id) {
                    Some(outgoing) => self.submit(outgoing).await,
                    None => tracing::debug!("nothing to resend for {}", local_id),
                }
            }
            Intent::Keystroke => {
                if let Some(active) = self.subscription.active().cloned() {
                    let actions = self.typing.on_input(active);
                    self.run_typing(actions).await;
                }
            }
            Intent::OpenConversation(user) => {
                let api = Arc::clone(&self.api);
                self.spawn_request(async move { Completion::Opened(api.open_conversation(&user).await) });
            }
            Intent::RefreshConversations => self.fetch_conversations(),
            Intent::DismissNotifications => {
                self.notifications.clear_all();
                self.publish(SessionEvent::NotificationsUpdated { total: 0 });
            }
            Intent::RequestMatch => {
                if !self.connection.is_connected() {
                    tracing::warn!("not connected, cannot search for a partner");
                    return;
                }
                self.apply_match(MatchEvent::RequestMatch).await;
            }
            Intent::CancelMatch => self.apply_match(MatchEvent::Cancel).await,
            Intent::EndMatch => self.apply_match(MatchEvent::LocalEnd).await,
            Intent::ExitMatch => self.apply_match(MatchEvent::Exit).await,
            Intent::SendRandom(body) => self.send_random(body).await,
            Intent::RandomKeystroke => {
                if let Some(peer) = self.matchmaking.chat_peer().cloned() {
                    let actions = self.random_typing.on_input(peer);
                    self.run_random_typing(actions).await;
                }
            }
            Intent::Shutdown => self.shutdown().await,
        }
    }

    async fn select_conversation(&mut self, next: Option<ConversationId>) {
        if self.subscription.active() == next.as_ref() {
            return;
        }
        if let Some(prev) = self.subscription.active().cloned() {
            let actions = self.typing.cancel(&prev);
            self.run_typing(actions).await;
            self.timers.cancel_where(|kind| {
                matches!(kind, TimerKind::TypingIdle(c) | TimerKind::RemoteTyping(c) if *c == prev)
            });
            self.remote_typing.clear(&prev);
        }

        let actions = self.subscription.set_active(next.clone());
        self.run_subscription(actions).await;
        self.merger.activate(next.clone());

        if let Some(conversation) = next.clone() {
            self.fetch_history(conversation.clone());
            self.request_status(conversation.clone()).await;
            self.request_clear(conversation).await;
        }
        self.publish(SessionEvent::ConversationSelected(next));
    }

    async fn send_message(&mut self, body: String) {
        if body.trim().is_empty() {
            return;
        }
        let Some(conversation) = self.subscription.active().cloned() else {
            tracing::warn!("no conversation selected, dropping message");
            return;
        };
        let actions = self.typing.on_sent(&conversation);
        self.run_typing(actions).await;

        let outgoing = self
            .merger
            .send(conversation, self.session.user.clone(), body, Utc::now());
        self.submit(outgoing).await;
    }

    async fn submit(&mut self, outgoing: OutgoingMessage) {
        let OutgoingMessage {
            local_id,
            conversation,
            message,
        } = outgoing;
        let purpose = AckPurpose::SendMessage {
            local_id,
            conversation,
        };
        self.in_flight.insert(local_id, message.clone());
        if !self.request(Outbound::NewMessage(message), purpose).await {
            // Stays pending until resent.
            self.in_flight.remove(&local_id);
        }
    }

    async fn send_random(&mut self, body: String) {
        if body.trim().is_empty() {
            return;
        }
        let me = self.session.user.clone();
        let Some(peer) = self.matchmaking.send(&me, body.clone(), Utc::now()) else {
            tracing::debug!("not chatting, dropping random talk message");
            return;
        };
        let actions = self.random_typing.on_sent(&peer);
        self.run_random_typing(actions).await;
        self.connection
            .emit(Outbound::RandomTalkMessage(RandomMessageOut {
                message: body,
                recipient_id: peer,
            }))
            .await;
        if let Some(message) = self.matchmaking.transient_messages().last() {
            self.publish(SessionEvent::RandomMessage(message.clone()));
        }
    }

    async fn apply_match(&mut self, event: MatchEvent) {
        let peer = self.matchmaking.chat_peer().cloned();
        let actions = match self.matchmaking.apply(event) {
            Ok(actions) => actions,
            Err(e) => {
                tracing::debug!("ignoring matchmaking event: {}", e);
                return;
            }
        };

        let status = self.matchmaking.status();
        if status != MatchStatus::Chatting {
            if let Some(peer) = peer {
                let stop = self.random_typing.cancel(&peer);
                self.run_random_typing(stop).await;
            }
        }
        if status != MatchStatus::Matched {
            self.timers.cancel(&TimerKind::MatchDisplay);
        }
        self.run_match(actions).await;
        self.publish(SessionEvent::MatchChanged(status));
    }

    // ===========================================
    // Side effects
    // ===========================================

    async fn run_subscription(&mut self, actions: Vec<SubscriptionAction>) {
        for action in actions {
            let event = match action {
                SubscriptionAction::Join(c) => Outbound::JoinChat(c.into()),
                SubscriptionAction::Leave(c) => Outbound::LeaveChat(c.into()),
            };
            self.connection.emit(event).await;
        }
    }

    async fn run_typing(&mut self, actions: Vec<TypingAction<ConversationId>>) {
        for action in actions {
            match action {
                TypingAction::Start(c) => {
                    self.connection.emit(Outbound::Typing(c.into())).await;
                }
                TypingAction::Stop(c) => {
                    self.connection.emit(Outbound::StopTyping(c.into())).await;
                }
                TypingAction::ArmIdle {
                    key,
                    delay,
                    generation,
                } => self.timers.arm(TimerKind::TypingIdle(key), delay, generation),
                TypingAction::CancelIdle(key) => {
                    self.timers.cancel(&TimerKind::TypingIdle(key));
                }
            }
        }
    }

    async fn run_random_typing(&mut self, actions: Vec<TypingAction<UserId>>) {
        for action in actions {
            let (peer, is_typing) = match action {
                TypingAction::Start(peer) => (peer, true),
                TypingAction::Stop(peer) => (peer, false),
                TypingAction::ArmIdle {
                    key,
                    delay,
                    generation,
                } => {
                    self.timers
                        .arm(TimerKind::RandomTypingIdle(key), delay, generation);
                    continue;
                }
                TypingAction::CancelIdle(key) => {
                    self.timers.cancel(&TimerKind::RandomTypingIdle(key));
                    continue;
                }
            };
            self.connection
                .emit(Outbound::RandomTalkTyping(RandomTypingOut {
                    sender_id: self.session.user.id.clone(),
                    recipient_id: peer,
                    is_typing,
                }))
                .await;
        }
    }

    async fn run_match(&mut self, actions: Vec<MatchAction>) {
        let me = self.session.user.id.clone();
        for action in actions {
            match action {
                MatchAction::FindMatch => {
                    self.connection
                        .emit(Outbound::FindRandomTalk(UserTarget { user_id: me.clone() }))
                        .await;
                }
                MatchAction::CancelSearch => {
                    self.connection
                        .emit(Outbound::CancelRandomTalk(UserTarget { user_id: me.clone() }))
                        .await;
                }
                MatchAction::EndSession { partner } => {
                    self.connection
                        .emit(Outbound::EndRandomTalk(protocol::EndRandomTalk {
                            user_id: me.clone(),
                            partner_id: partner,
                        }))
                        .await;
                }
                MatchAction::ArmDisplayTimer { delay } => {
                    self.timers.arm(TimerKind::MatchDisplay, delay, 0);
                }
            }
        }
    }

    // ===========================================
    // Timers
    // ===========================================

    async fn handle_timer(&mut self, timer: Timer) {
        let Timer { kind, generation } = timer;
        match kind {
            TimerKind::Reconnect => {
                let outputs = self.connection.on_reconnect_timer().await;
                self.apply_connection(outputs).await;
            }
            TimerKind::TypingIdle(conversation) => {
                let actions = self.typing.on_idle(&conversation, generation);
                self.run_typing(actions).await;
            }
            TimerKind::RandomTypingIdle(peer) => {
                let actions = self.random_typing.on_idle(&peer, generation);
                self.run_random_typing(actions).await;
            }
            TimerKind::RemoteTyping(conversation) => {
                if self.remote_typing.expire(&conversation) {
                    self.publish(SessionEvent::TypingChanged {
                        conversation,
                        typing: false,
                    });
                }
            }
            TimerKind::MatchDisplay => self.apply_match(MatchEvent::DisplayElapsed).await,
            TimerKind::Ack(id) => {
                if let Some(purpose) = self.connection.expire_ack(id) {
                    tracing::warn!("ack {} timed out", id);
                    self.settle_ack(purpose, None);
                }
            }
        }
    }

    // ===========================================
    // REST
    // ===========================================

    fn spawn_request<F>(&self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let _ = completions.send(request.await);
        });
    }

    fn fetch_conversations(&mut self) {
        if self.refreshing_conversations {
            return;
        }
        self.refreshing_conversations = true;
        let api = Arc::clone(&self.api);
        self.spawn_request(async move { Completion::Conversations(api.conversations().await) });
    }

    fn fetch_notifications(&self) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move { Completion::Notifications(api.notifications().await) });
    }

    fn fetch_history(&self, conversation: ConversationId) {
        let api = Arc::clone(&self.api);
        self.spawn_request(async move {
            let result = api.messages(&conversation).await;
            Completion::History {
                conversation,
                result,
            }
        });
    }

    async fn handle_completion(&mut self, done: Completion) {
        match done {
            Completion::Conversations(result) => {
                self.refreshing_conversations = false;
                match result {
                    Ok(conversations) => {
                        self.conversations.set_all(conversations);
                        self.notifications.resolve(&self.conversations);
                        self.publish(SessionEvent::ConversationsUpdated);
                    }
                    Err(e) => self.request_failed("conversation list", e),
                }
            }
            Completion::Notifications(Ok(notifications)) => {
                self.notifications.replace_all(notifications);
                if !self.notifications.unresolved(&self.conversations).is_empty() {
                    self.fetch_conversations();
                }
                if let Some(active) = self.subscription.active().cloned() {
                    self.request_clear(active).await;
                }
                self.publish(SessionEvent::NotificationsUpdated {
                    total: self.notifications.total(),
                });
            }
            Completion::History {
                conversation,
                result: Ok(history),
            } => {
                if self.merger.load_history(&conversation, history) {
                    self.publish(SessionEvent::HistoryLoaded(conversation));
                } else {
                    tracing::debug!("discarding stale history for {}", conversation);
                }
            }
            Completion::Opened(Ok(conversation)) => {
                let id = conversation.id.clone();
                self.conversations.add(conversation);
                self.publish(SessionEvent::ConversationsUpdated);
                self.select_conversation(Some(id)).await;
            }
            Completion::Notifications(Err(e)) => self.request_failed("notifications", e),
            Completion::History { result: Err(e), .. } => self.request_failed("history", e),
            Completion::Opened(Err(e)) => self.request_failed("open conversation", e),
        }
    }

    fn request_failed(&self, what: &str, error: ApiError) {
        tracing::warn!("{} request failed: {}", what, error);
        self.publish(SessionEvent::RequestFailed(format!("{what}: {error}")));
    }
}

/// The server's copy of a sent message from its ack, or `None` if the ack
/// reports a failure. Acks that carry only an id are completed from the
/// pending copy.
fn stored_copy(data: Value, pending: Option<&Message>) -> Option<Message> {
    let id = data.get("_id")?.as_str()?.to_string();
    match serde_json::from_value::<Message>(data) {
        Ok(message) => Some(message),
        Err(_) => pending.map(|p| Message {
            id: Some(MessageId::new(id)),
            ..p.clone()
        }),
    }
}
