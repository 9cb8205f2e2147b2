//! Persisted login token.
//!
//! The token lives in `session.json` inside the data directory as
//! `{"chatToken": "..."}`, readable only by the owner on Unix.

use std::path::{Path, PathBuf};

use chat_core::{AuthToken, Session};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::api::{ApiError, ChatApi};
use crate::error::ClientError;

const FILE_NAME: &str = "session.json";

/// Token store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The file exists but is not valid JSON.
    #[error("invalid session file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chat_token: Option<String>,
}

/// File-backed storage for the login token.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Store the token under `data_dir`.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(FILE_NAME),
        }
    }

    /// Location of the session file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token, if any.
    pub async fn load(&self) -> Result<Option<AuthToken>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let stored: StoredSession = serde_json::from_str(&contents)?;
        Ok(stored
            .chat_token
            .filter(|t| !t.is_empty())
            .map(AuthToken::new))
    }

    /// Persist `token`, replacing any previous one.
    pub async fn save(&self, token: &AuthToken) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let stored = StoredSession {
            chat_token: Some(token.expose().to_string()),
        };
        tokio::fs::write(&self.path, serde_json::to_string_pretty(&stored)?).await?;
        set_file_permissions_0600(&self.path).await?;
        Ok(())
    }

    /// Forget the token. Succeeds if there was none.
    pub async fn clear(&self) -> Result<(), StoreError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Turn a stored token back into a session.
///
/// Returns `Ok(None)` when no token is stored, and also when the server
/// rejects the stored token (which is then removed).
pub async fn restore_session<A: ChatApi + ?Sized>(
    store: &TokenStore,
    api: &A,
) -> Result<Option<Session>, ClientError> {
    let Some(token) = store.load().await? else {
        return Ok(None);
    };
    match api.verify_token(&token).await {
        Ok(user) => Ok(Some(Session::new(user, token))),
        Err(ApiError::InvalidToken) | Err(ApiError::Unauthorized) => {
            tracing::info!("stored token rejected, clearing it");
            store.clear().await?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// Set file permissions to 0600 (owner read/write only) on Unix.
/// No-op on non-Unix platforms.
async fn set_file_permissions_0600(path: &Path) -> Result<(), StoreError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::MockApi;
    use chat_types::User;
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_means_no_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_load_clear() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(&dir.path().join("nested"));

        store.save(&AuthToken::new("tok-1")).await.unwrap();
        let raw = tokio::fs::read_to_string(store.path()).await.unwrap();
        assert!(raw.contains("\"chatToken\""));
        assert_eq!(store.load().await.unwrap(), Some(AuthToken::new("tok-1")));

        store.clear().await.unwrap();
        assert!(store.load().await.unwrap().is_none());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn empty_token_is_ignored() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        tokio::fs::write(store.path(), r#"{"chatToken": ""}"#)
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn session_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&AuthToken::new("tok")).await.unwrap();

        let perms = tokio::fs::metadata(store.path()).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o600, "file should be 0600");
    }

    #[tokio::test]
    async fn restore_verifies_token() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&AuthToken::new("good")).await.unwrap();
        let api = MockApi::new();
        api.set_user("good", User::new("u1", "Alice"));

        let session = restore_session(&store, &api).await.unwrap().unwrap();
        assert_eq!(session.user.name, "Alice");
        assert_eq!(session.token.expose(), "good");
    }

    #[tokio::test]
    async fn rejected_token_is_cleared() {
        let dir = tempdir().unwrap();
        let store = TokenStore::new(dir.path());
        store.save(&AuthToken::new("stale")).await.unwrap();

        let session = restore_session(&store, &MockApi::new()).await.unwrap();
        assert!(session.is_none());
        assert!(!store.path().exists());
    }
}
