//! Verify and store an auth token.

use anyhow::{Context, Result};
use chat_client::{ApiError, ChatApi, HttpApi, TokenStore};
use chat_core::AuthToken;
use chat_types::User;
use std::path::Path;

use crate::config::CliConfig;

/// Run the login command.
pub async fn run(data_dir: &Path, config: &CliConfig, token: &str) -> Result<()> {
    let token = AuthToken::new(token.trim());
    let api = HttpApi::with_timeout(&config.api_url, token.clone(), config.request_timeout())?;
    let store = TokenStore::new(data_dir);

    let user = login(&store, &api, &token).await?;

    println!("Logged in as {}", user.name);
    println!();
    println!("  User ID:  {}", user.id);
    println!("  Server:   {}", config.api_url);
    println!("  Data dir: {}", data_dir.display());
    println!();
    println!("Next steps:");
    println!("  1. See your conversations: parley status");
    println!("  2. Start chatting: parley listen --conversation <name>");

    Ok(())
}

/// Ask the server who `token` belongs to and store it.
pub async fn login<A: ChatApi>(store: &TokenStore, api: &A, token: &AuthToken) -> Result<User> {
    if token.expose().is_empty() {
        anyhow::bail!("Token must not be empty");
    }
    let user = match api.verify_token(token).await {
        Ok(user) => user,
        Err(ApiError::InvalidToken) | Err(ApiError::Unauthorized) => {
            anyhow::bail!("The server rejected this token")
        }
        Err(e) => return Err(e).context("Failed to verify token"),
    };
    store.save(token).await.context("Failed to store token")?;
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_client::MockApi;
    use tempfile::tempdir;

    #[tokio::test]
    async fn login_stores_verified_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let api = MockApi::new();
        api.set_user("tok", User::new("u1", "Alice"));

        let user = login(&store, &api, &AuthToken::new("tok")).await.unwrap();

        assert_eq!(user.name, "Alice");
        assert_eq!(store.load().await.unwrap(), Some(AuthToken::new("tok")));
    }

    #[tokio::test]
    async fn rejected_token_is_not_stored() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());

        let result = login(&store, &MockApi::new(), &AuthToken::new("bad")).await;

        assert!(result.is_err());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_token_fails_fast() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        let api = MockApi::new();

        assert!(login(&store, &api, &AuthToken::new("")).await.is_err());
        assert!(api.calls().is_empty());
    }
}
