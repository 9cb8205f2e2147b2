//! REST collaborators.
//!
//! The session loop fetches the conversation list, unread counters and
//! message history over HTTP. [`ChatApi`] is the seam; [`HttpApi`] talks to
//! the real server and [`MockApi`] serves canned data in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chat_core::AuthToken;
use chat_types::{Conversation, ConversationId, Message, Notification, User, UserId};
use serde::Serialize;
use thiserror::Error;

/// REST errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request could not be sent or the body could not be decoded.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server rejected our credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// The server does not know the token.
    #[error("token rejected")]
    InvalidToken,

    /// Any other non-success status.
    #[error("unexpected status {0}")]
    Status(u16),

    /// No canned response (mock only).
    #[error("no response configured for {0}")]
    Missing(String),
}

/// REST operations the session needs.
#[async_trait]
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /api/chat`
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError>;

    /// `GET /api/notification`
    async fn notifications(&self) -> Result<Vec<Notification>, ApiError>;

    /// `GET /api/message/{id}`
    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, ApiError>;

    /// `POST /api/chat` - open (or find) a one-to-one conversation.
    async fn open_conversation(&self, user: &UserId) -> Result<Conversation, ApiError>;

    /// `POST /api/user/verifyToken` - resolve a stored token to its user.
    async fn verify_token(&self, token: &AuthToken) -> Result<User, ApiError>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OpenConversation<'a> {
    user_id: &'a UserId,
}

#[derive(Serialize)]
struct VerifyToken<'a> {
    token: &'a str,
}

/// [`ChatApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpApi {
    http: reqwest::Client,
    base_url: String,
    token: AuthToken,
}

impl HttpApi {
    /// Create a client for `base_url` authenticating with `token`.
    pub fn new(base_url: impl Into<String>, token: AuthToken) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Create a client with a request timeout.
    pub fn with_timeout(
        base_url: impl Into<String>,
        token: AuthToken,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let response = self
            .http
            .get(self.url(path))
            .bearer_auth(self.token.expose())
            .send()
            .await?;
        Ok(check(response)?.json().await?)
    }
}

fn check(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    match response.status().as_u16() {
        200..=299 => Ok(response),
        401 | 403 => Err(ApiError::Unauthorized),
        status => Err(ApiError::Status(status)),
    }
}

#[async_trait]
impl ChatApi for HttpApi {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.get("/api/chat").await
    }

    async fn notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.get("/api/notification").await
    }

    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, ApiError> {
        self.get(&format!("/api/message/{}", conversation)).await
    }

    async fn open_conversation(&self, user: &UserId) -> Result<Conversation, ApiError> {
        let response = self
            .http
            .post(self.url("/api/chat"))
            .bearer_auth(self.token.expose())
            .json(&OpenConversation { user_id: user })
            .send()
            .await?;
        Ok(check(response)?.json().await?)
    }

    async fn verify_token(&self, token: &AuthToken) -> Result<User, ApiError> {
        let response = self
            .http
            .post(self.url("/api/user/verifyToken"))
            .json(&VerifyToken {
                token: token.expose(),
            })
            .send()
            .await?;
        let value: serde_json::Value = match check(response) {
            Ok(response) => response.json().await?,
            Err(ApiError::Unauthorized) => return Err(ApiError::InvalidToken),
            Err(e) => return Err(e),
        };
        // Anything without a user id means the token is not valid.
        serde_json::from_value(value).map_err(|_| ApiError::InvalidToken)
    }
}

#[derive(Debug, Default)]
struct MockApiInner {
    conversations: Vec<Conversation>,
    notifications: Vec<Notification>,
    messages: HashMap<ConversationId, Vec<Message>>,
    opened: HashMap<UserId, Conversation>,
    users: HashMap<String, User>,
    delay: Option<Duration>,
    calls: Vec<String>,
}

/// In-memory [`ChatApi`] for tests.
#[derive(Debug, Clone, Default)]
pub struct MockApi {
    inner: Arc<Mutex<MockApiInner>>,
}

impl MockApi {
    /// Create an API with no data.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockApiInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Serve this conversation list.
    pub fn set_conversations(&self, conversations: Vec<Conversation>) {
        self.lock().conversations = conversations;
    }

    /// Serve these unread counters.
    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.lock().notifications = notifications;
    }

    /// Serve this history for a conversation.
    pub fn set_messages(&self, conversation: ConversationId, messages: Vec<Message>) {
        self.lock().messages.insert(conversation, messages);
    }

    /// Answer `open_conversation(user)` with `conversation`.
    pub fn set_opened(&self, user: UserId, conversation: Conversation) {
        self.lock().opened.insert(user, conversation);
    }

    /// Accept `token` as belonging to `user`.
    pub fn set_user(&self, token: &str, user: User) {
        self.lock().users.insert(token.to_string(), user);
    }

    /// Delay every response (use with paused time).
    pub fn set_delay(&self, delay: Duration) {
        self.lock().delay = Some(delay);
    }

    /// Requests made so far, as `"METHOD path"`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    async fn record(&self, call: String) {
        let delay = {
            let mut inner = self.lock();
            inner.calls.push(call);
            inner.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl ChatApi for MockApi {
    async fn conversations(&self) -> Result<Vec<Conversation>, ApiError> {
        self.record("GET /api/chat".into()).await;
        Ok(self.lock().conversations.clone())
    }

    async fn notifications(&self) -> Result<Vec<Notification>, ApiError> {
        self.record("GET /api/notification".into()).await;
        Ok(self.lock().notifications.clone())
    }

    async fn messages(&self, conversation: &ConversationId) -> Result<Vec<Message>, ApiError> {
        self.record(format!("GET /api/message/{}", conversation)).await;
        Ok(self
            .lock()
            .messages
            .get(conversation)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_conversation(&self, user: &UserId) -> Result<Conversation, ApiError> {
        self.record("POST /api/chat".into()).await;
        self.lock()
            .opened
            .get(user)
            .cloned()
            .ok_or_else(|| ApiError::Missing(format!("conversation with {}", user)))
    }

    async fn verify_token(&self, token: &AuthToken) -> Result<User, ApiError> {
        self.record("POST /api/user/verifyToken".into()).await;
        self.lock()
            .users
            .get(token.expose())
            .cloned()
            .ok_or(ApiError::InvalidToken)
    }
}
