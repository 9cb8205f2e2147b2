//! Follow the live session.

use anyhow::Result;
use chat_client::{Intent, SessionEvent};
use std::path::Path;

use super::{interact, open_session, resolve_conversation, wait_for};
use crate::config::CliConfig;

/// Run the listen command.
pub async fn run(data_dir: &Path, config: &CliConfig, conversation: Option<&str>) -> Result<()> {
    let mut chat = open_session(data_dir, config).await?;
    let mut events = chat.subscribe();
    chat.start().await;

    if let Some(target) = conversation {
        wait_for(&mut chat, &mut events, config.request_timeout(), |e| {
            matches!(e, SessionEvent::ConversationsUpdated)
        })
        .await?;
        let id = resolve_conversation(&chat.conversations(), target)?;
        chat.handle().send(Intent::SelectConversation(Some(id)))?;
        println!("Chatting in {}. /quit to leave.", target);
    } else {
        println!("Listening. /quit to leave.");
    }

    interact(&mut chat, &mut events, parse_line).await
}

/// Turn an input line into intents.
///
/// `/quit` stops, `/read` dismisses all unread counters, `/refresh` reloads
/// the conversation list. Anything else is sent to the open conversation.
pub fn parse_line(line: &str) -> Vec<Intent> {
    match line {
        "" => Vec::new(),
        "/quit" => vec![Intent::Shutdown],
        "/read" => vec![Intent::DismissNotifications],
        "/refresh" => vec![Intent::RefreshConversations],
        text => vec![Intent::Keystroke, Intent::SendMessage(text.to_string())],
    }
}
