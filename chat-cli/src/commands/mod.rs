//! CLI command implementations.

pub mod listen;
pub mod login;
pub mod logout;
pub mod random;
pub mod send;
pub mod status;

use anyhow::{Context, Result};
use chat_client::{
    restore_session, ChatApi, ChatSession, HttpApi, Intent, SessionEvent, SessionHandle,
    TokenStore, Transport, WebSocketTransport,
};
use chat_core::{ConnectionNotice, ConversationView, MatchStatus};
use chat_types::{ConversationId, Message, UserId};
use chrono::Local;
use std::io::BufRead;
use std::path::Path;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::TryRecvError};

use crate::config::CliConfig;

/// Restore the stored login and build a session against the real server.
pub async fn open_session(
    data_dir: &Path,
    config: &CliConfig,
) -> Result<ChatSession<WebSocketTransport, HttpApi>> {
    let store = TokenStore::new(data_dir);
    let token = store
        .load()
        .await?
        .context("Not logged in. Run 'parley login --token <token>' first.")?;
    let api = HttpApi::with_timeout(&config.api_url, token, config.request_timeout())?;
    let session = restore_session(&store, &api)
        .await?
        .context("The stored token was rejected. Run 'parley login' again.")?;
    Ok(ChatSession::new(
        config.to_client_config(),
        session,
        WebSocketTransport::new(),
        api,
    ))
}

/// Drive the session until an event matches, or fail after `limit`.
///
/// A timeout can interrupt a step, so the session should only be shut down
/// after an error.
pub async fn wait_for<T, A, F>(
    chat: &mut ChatSession<T, A>,
    events: &mut broadcast::Receiver<SessionEvent>,
    limit: Duration,
    mut matches: F,
) -> Result<SessionEvent>
where
    T: Transport,
    A: ChatApi,
    F: FnMut(&SessionEvent) -> bool,
{
    let wait = async {
        loop {
            while let Ok(event) = events.try_recv() {
                if matches(&event) {
                    return Ok(event);
                }
            }
            if !chat.step().await {
                anyhow::bail!("Session closed");
            }
        }
    };
    tokio::time::timeout(limit, wait)
        .await
        .context("Timed out waiting for the server")?
}

/// Find a conversation by id or (case-insensitive) display name.
pub fn resolve_conversation(
    conversations: &[ConversationView<'_>],
    target: &str,
) -> Result<ConversationId> {
    conversations
        .iter()
        .find(|v| v.conversation.id.as_str() == target)
        .or_else(|| {
            conversations
                .iter()
                .find(|v| v.display_name.eq_ignore_ascii_case(target))
        })
        .map(|v| v.conversation.id.clone())
        .with_context(|| format!("No conversation named '{}'", target))
}

/// One-line rendering of a message.
pub fn format_message(message: &Message) -> String {
    format!(
        "[{}] {}: {}",
        message.created_at.with_timezone(&Local).format("%H:%M"),
        message.sender.name,
        message.body
    )
}

/// What to print for a session event, if anything.
pub fn describe(event: &SessionEvent, me: &UserId) -> Option<String> {
    match event {
        SessionEvent::Connection(notice) => Some(match notice {
            ConnectionNotice::Connected => "* connected".to_string(),
            ConnectionNotice::ConnectFailed { attempt, error } => {
                format!("* connect attempt {} failed: {}", attempt + 1, error)
            }
            ConnectionNotice::Lost { reason, .. } => format!("* connection lost: {}", reason),
            ConnectionNotice::ReconnectExhausted { attempts, error } => {
                format!("* gave up after {} retries: {}", attempts, error)
            }
            ConnectionNotice::Rejected { error } => {
                format!("* server refused the session: {}", error)
            }
            ConnectionNotice::Disconnected => "* disconnected".to_string(),
        }),
        SessionEvent::MessageReceived(message) => Some(format_message(message)),
        SessionEvent::MessageFailed { .. } => Some("! message not delivered".to_string()),
        SessionEvent::NotificationsUpdated { total } if *total > 0 => {
            Some(format!("* {} unread", total))
        }
        SessionEvent::TypingChanged { typing: true, .. } => Some("* typing...".to_string()),
        SessionEvent::MatchChanged(status) => match status {
            MatchStatus::Searching => Some("* looking for a partner...".to_string()),
            MatchStatus::Matched => Some("* matched!".to_string()),
            MatchStatus::Chatting => Some("* you are now chatting, say hi".to_string()),
            MatchStatus::Ended => {
                Some("* chat ended. /next for a new partner, /quit to leave".to_string())
            }
            MatchStatus::Idle => None,
        },
        SessionEvent::RandomMessage(message) if &message.sender.id != me => {
            Some(format!("{}: {}", message.sender.name, message.body))
        }
        SessionEvent::PeerTyping(true) => Some("* stranger is typing...".to_string()),
        SessionEvent::RequestFailed(error) => Some(format!("! {}", error)),
        _ => None,
    }
}

/// Run the session interactively: print events, turn stdin lines into
/// intents, and shut down on Ctrl-C or end of input.
///
/// Stdin and Ctrl-C only feed the [`SessionHandle`]; the loop
/// itself awaits nothing but [`ChatSession::step`].
pub async fn interact<T, A, F>(
    chat: &mut ChatSession<T, A>,
    events: &mut broadcast::Receiver<SessionEvent>,
    on_line: F,
) -> Result<()>
where
    T: Transport,
    A: ChatApi,
    F: FnMut(&str) -> Vec<Intent> + Send + 'static,
{
    read_input(chat.handle(), on_line);

    let handle = chat.handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = handle.send(Intent::Shutdown);
        }
    });

    follow(chat, events, |line| println!("{}", line)).await;
    interrupt.abort();
    Ok(())
}

/// Read stdin on its own thread; a blocked read must not hold up shutdown.
fn read_input<F>(handle: SessionHandle, mut on_line: F)
where
    F: FnMut(&str) -> Vec<Intent> + Send + 'static,
{
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!("stdin: {}", e);
                    break;
                }
            };
            for intent in on_line(line.trim()) {
                if handle.send(intent).is_err() {
                    return;
                }
            }
        }
        let _ = handle.send(Intent::Shutdown);
    });
}

/// Step the session until it stops, printing what each step published.
///
/// A step always runs to completion before the events it raised are read.
pub async fn follow<T, A, P>(
    chat: &mut ChatSession<T, A>,
    events: &mut broadcast::Receiver<SessionEvent>,
    mut print: P,
) where
    T: Transport,
    A: ChatApi,
    P: FnMut(String),
{
    let me = chat.session().user.id.clone();
    loop {
        let alive = chat.step().await;
        loop {
            match events.try_recv() {
                Ok(event) => render(chat, &event, &me).into_iter().for_each(&mut print),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("skipped {} session events", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        if !alive {
            break;
        }
    }
}

/// Lines to print for an event, given the session it came from.
fn render<T, A>(chat: &ChatSession<T, A>, event: &SessionEvent, me: &UserId) -> Vec<String>
where
    T: Transport,
    A: ChatApi,
{
    match event {
        SessionEvent::HistoryLoaded(_) => chat.messages().iter().map(format_message).collect(),
        SessionEvent::PresenceChanged(_) => chat
            .status_line()
            .map(|line| format!("* {}", line))
            .into_iter()
            .collect(),
        event => describe(event, me).into_iter().collect(),
    }
}
