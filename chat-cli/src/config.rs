//! Configuration management for parley.

use anyhow::{Context, Result};
use chat_client::ClientConfig;
use chat_core::ReconnectPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Name of the config file inside the data directory.
pub const CONFIG_FILE: &str = "parley.toml";

/// Settings read from `parley.toml`.
///
/// Every field has a default, so a missing or partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// WebSocket endpoint of the server.
    pub server_url: String,
    /// Base URL of the REST API.
    pub api_url: String,
    /// Reconnect behaviour.
    pub reconnect: ReconnectSection,
    /// Timeouts and debounce intervals.
    pub timing: TimingSection,
}

/// `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    /// Retries before giving up.
    pub max_attempts: u32,
    /// Delay between retries, in milliseconds.
    pub delay_ms: u64,
}

/// `[timing]` table, all values in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    /// Quiet period before `stopTyping` is sent.
    pub typing_idle_ms: u64,
    /// Lifetime of a remote typing indicator.
    pub remote_typing_expiry_ms: u64,
    /// How long a random-talk match is shown.
    pub match_display_ms: u64,
    /// Acknowledgement timeout.
    pub ack_timeout_ms: u64,
    /// REST request timeout.
    pub request_timeout_ms: u64,
}

impl Default for CliConfig {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            server_url: client.server_url,
            api_url: client.api_url,
            reconnect: ReconnectSection::default(),
            timing: TimingSection::default(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            delay_ms: millis(policy.delay),
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        let client = ClientConfig::default();
        Self {
            typing_idle_ms: millis(client.typing_idle),
            remote_typing_expiry_ms: millis(client.remote_typing_expiry),
            match_display_ms: millis(client.match_display_delay),
            ack_timeout_ms: millis(client.ack_timeout),
            request_timeout_ms: 15_000,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl CliConfig {
    /// Load from `path`, falling back to defaults if the file does not exist.
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = match tokio::fs::read_to_string(path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", path.display()))
            }
        };
        toml::from_str(&contents).with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Write the configuration to `path`.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to encode configuration")?;
        tokio::fs::write(path, contents)
            .await
            .context("Failed to save configuration")?;
        Ok(())
    }

    /// Session settings for the client library.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig::new(&self.server_url, &self.api_url)
            .with_reconnect(ReconnectPolicy::new(
                self.reconnect.max_attempts,
                Duration::from_millis(self.reconnect.delay_ms),
            ))
            .with_typing_idle(Duration::from_millis(self.timing.typing_idle_ms))
            .with_remote_typing_expiry(Duration::from_millis(self.timing.remote_typing_expiry_ms))
            .with_match_display_delay(Duration::from_millis(self.timing.match_display_ms))
            .with_ack_timeout(Duration::from_millis(self.timing.ack_timeout_ms))
    }

    /// REST request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.timing.request_timeout_ms)
    }
}

/// Set directory permissions to 0700 (owner only) on Unix.
/// No-op on non-Unix platforms.
pub async fn set_dir_permissions_0700(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .await
            .context("Failed to set directory permissions")?;
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
    use tempfile::tempdir;

    #[tokio::test]
    async fn missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = CliConfig::load(&dir.path().join(CONFIG_FILE)).await.unwrap();
        assert_eq!(config, CliConfig::default());
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.timing.typing_idle_ms, 3000);
    }

    #[tokio::test]
    async fn partial_file_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(
            &path,
            "server_url = \"wss://chat.example.com/ws\"\n\n[reconnect]\nmax_attempts = 2\n",
        )
        .await
        .unwrap();

        let config = CliConfig::load(&path).await.unwrap();
        assert_eq!(config.server_url, "wss://chat.example.com/ws");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.delay_ms, 1000);
        assert_eq!(config.api_url, "http://localhost:4000");
    }

    #[tokio::test]
    async fn invalid_file_is_an_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        tokio::fs::write(&path, "server_url = [").await.unwrap();
        assert!(CliConfig::load(&path).await.is_err());
    }

    #[tokio::test]
    async fn save_and_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = CliConfig::default();
        config.timing.ack_timeout_ms = 2500;
        config.save(&path).await.unwrap();

        assert_eq!(CliConfig::load(&path).await.unwrap(), config);
    }

    #[test]
    fn converts_to_client_config() {
        let mut config = CliConfig::default();
        config.reconnect = ReconnectSection {
            max_attempts: 3,
            delay_ms: 250,
        };
        config.timing.ack_timeout_ms = 4000;

        let client = config.to_client_config();
        assert_eq!(client.reconnect, ReconnectPolicy::new(3, Duration::from_millis(250)));
        assert_eq!(client.ack_timeout, Duration::from_secs(4));
        assert_eq!(client.typing_idle, Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn data_dir_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let data_dir = dir.path().join("test-data");
        tokio::fs::create_dir_all(&data_dir).await.unwrap();
        set_dir_permissions_0700(&data_dir).await.unwrap();

        let perms = tokio::fs::metadata(&data_dir).await.unwrap().permissions();
        assert_eq!(perms.mode() & 0o777, 0o700, "dir should be 0700");
    }
}
