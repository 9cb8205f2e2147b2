//! Session configuration.

use std::time::Duration;

use chat_core::{ReconnectPolicy, MATCH_DISPLAY_DELAY, REMOTE_TYPING_EXPIRY, TYPING_IDLE};

/// Default time to wait for an acknowledgement.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a [`ChatSession`](crate::ChatSession).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint of the relay.
    pub server_url: String,
    /// Base URL of the REST API.
    pub api_url: String,
    /// Reconnect policy after a transport failure.
    pub reconnect: ReconnectPolicy,
    /// Quiet period after the last keystroke before `stopTyping` is sent.
    pub typing_idle: Duration,
    /// How long a remote typing indicator survives without a stop signal.
    pub remote_typing_expiry: Duration,
    /// How long a random-talk match is shown before chatting starts.
    pub match_display_delay: Duration,
    /// How long to wait for an acknowledgement before giving up.
    pub ack_timeout: Duration,
}

impl ClientConfig {
    /// Create a configuration with default timings.
    pub fn new(server_url: &str, api_url: &str) -> Self {
        Self {
            server_url: server_url.to_string(),
            api_url: api_url.to_string(),
            reconnect: ReconnectPolicy::default(),
            typing_idle: TYPING_IDLE,
            remote_typing_expiry: REMOTE_TYPING_EXPIRY,
            match_display_delay: MATCH_DISPLAY_DELAY,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }

    /// Set the reconnect policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    /// Set the local typing idle time.
    pub fn with_typing_idle(mut self, idle: Duration) -> Self {
        self.typing_idle = idle;
        self
    }

    /// Set the remote typing expiry guard.
    pub fn with_remote_typing_expiry(mut self, expiry: Duration) -> Self {
        self.remote_typing_expiry = expiry;
        self
    }

    /// Set the match display delay.
    pub fn with_match_display_delay(mut self, delay: Duration) -> Self {
        self.match_display_delay = delay;
        self
    }

    /// Set the acknowledgement timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new("ws://localhost:4000/ws", "http://localhost:4000")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_timings() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.reconnect.delay, Duration::from_secs(1));
        assert_eq!(config.typing_idle, Duration::from_secs(3));
        assert_eq!(config.match_display_delay, Duration::from_secs(2));
        assert_eq!(config.ack_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder_overrides() {
        let config = ClientConfig::new("ws://relay", "http://api")
            .with_reconnect(ReconnectPolicy::new(2, Duration::from_millis(250)))
            .with_typing_idle(Duration::from_secs(1))
            .with_ack_timeout(Duration::from_secs(3));

        assert_eq!(config.server_url, "ws://relay");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.typing_idle, Duration::from_secs(1));
        assert_eq!(config.ack_timeout, Duration::from_secs(3));
    }
}
