//! Show the session and unread counters.

use anyhow::{Context, Result};
use chat_client::{restore_session, ChatApi, HttpApi, TokenStore};
use chat_core::{ConversationList, NotificationAggregator};
use std::fmt::Write as _;
use std::path::Path;

use crate::config::CliConfig;

/// Run the status command.
pub async fn run(data_dir: &Path, config: &CliConfig) -> Result<()> {
    println!("=== parley status ===");
    println!();

    let store = TokenStore::new(data_dir);
    let Some(token) = store.load().await? else {
        println!("Session: NOT LOGGED IN");
        println!();
        println!("Run 'parley login --token <token>' to log in.");
        return Ok(());
    };

    let api = HttpApi::with_timeout(&config.api_url, token, config.request_timeout())?;
    print!("{}", report(&store, &api, config).await?);
    Ok(())
}

/// Build the status report for a stored login.
pub async fn report<A: ChatApi>(store: &TokenStore, api: &A, config: &CliConfig) -> Result<String> {
    let mut out = String::new();

    let Some(session) = restore_session(store, api).await? else {
        writeln!(out, "Session: TOKEN REJECTED (cleared)")?;
        writeln!(out)?;
        writeln!(out, "Run 'parley login --token <token>' to log in again.")?;
        return Ok(out);
    };

    writeln!(out, "Session:")?;
    writeln!(out, "  User:   {} ({})", session.user.name, session.user.id)?;
    writeln!(out, "  Server: {}", config.server_url)?;
    writeln!(out, "  API:    {}", config.api_url)?;
    writeln!(out)?;

    let mut conversations = ConversationList::new();
    conversations.set_all(api.conversations().await.context("Failed to load conversations")?);
    let mut notifications = NotificationAggregator::new();
    notifications.replace_all(
        api.notifications()
            .await
            .context("Failed to load notifications")?,
    );

    let views = conversations.views(&notifications, &session.user.id);
    writeln!(
        out,
        "Conversations: {} ({} unread)",
        views.len(),
        notifications.total()
    )?;
    for view in &views {
        if view.unseen_count > 0 {
            writeln!(
                out,
                "  {:<24} {} unread",
                view.display_name, view.unseen_count
            )?;
        } else {
            writeln!(out, "  {}", view.display_name)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_client::MockApi;
    use chat_core::AuthToken;
    use chat_types::{Conversation, ConversationId, ConversationRef, Notification, User};
    use tempfile::tempdir;

    #[tokio::test]
    async fn status_without_login() {
        let dir = tempdir().unwrap();

        // Should succeed but show "not logged in"
        let result = run(dir.path(), &CliConfig::default()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn report_lists_unread_counts() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&AuthToken::new("tok")).await.unwrap();

        let api = MockApi::new();
        api.set_user("tok", User::new("u1", "Alice"));
        api.set_conversations(vec![Conversation {
            id: ConversationId::new("c1"),
            name: String::new(),
            is_group: false,
            participants: vec![User::new("u1", "Alice"), User::new("u2", "Bob")],
            latest_message: None,
        }]);
        api.set_notifications(vec![Notification {
            chat: ConversationRef::Id(ConversationId::new("c1")),
            count: 3,
            last_message: None,
        }]);

        let out = report(&store, &api, &CliConfig::default()).await.unwrap();

        assert!(out.contains("Alice (u1)"), "{out}");
        assert!(out.contains("Conversations: 1 (3 unread)"), "{out}");
        assert!(out.contains("Bob"), "{out}");
    }

    #[tokio::test]
    async fn report_clears_rejected_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&AuthToken::new("stale")).await.unwrap();

        let out = report(&store, &MockApi::new(), &CliConfig::default())
            .await
            .unwrap();

        assert!(out.contains("TOKEN REJECTED"));
        assert!(store.load().await.unwrap().is_none());
    }
}
