//! Talk to a random partner.

use anyhow::Result;
use chat_client::{Intent, SessionEvent};
use std::path::Path;

use super::{interact, open_session, wait_for};
use crate::config::CliConfig;

/// Run the random command.
pub async fn run(data_dir: &Path, config: &CliConfig) -> Result<()> {
    let mut chat = open_session(data_dir, config).await?;
    let mut events = chat.subscribe();
    chat.start().await;

    if !chat.session().is_connected() {
        wait_for(&mut chat, &mut events, config.request_timeout(), |e| {
            matches!(
                e,
                SessionEvent::Connection(chat_core::ConnectionNotice::Connected)
            )
        })
        .await?;
    }
    chat.handle().send(Intent::RequestMatch)?;
    println!("/end ends the chat, /next finds a new partner, /quit leaves.");

    interact(&mut chat, &mut events, parse_line).await
}

/// Turn an input line into intents.
pub fn parse_line(line: &str) -> Vec<Intent> {
    match line {
        "" => Vec::new(),
        "/end" => vec![Intent::EndMatch],
        // Leaving an ended chat and searching again.
        "/next" => vec![Intent::EndMatch, Intent::ExitMatch, Intent::RequestMatch],
        "/quit" => vec![
            Intent::CancelMatch,
            Intent::EndMatch,
            Intent::ExitMatch,
            Intent::Shutdown,
        ],
        text => vec![Intent::RandomKeystroke, Intent::SendRandom(text.to_string())],
    }
}
