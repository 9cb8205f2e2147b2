//! # chat-client
//!
//! Realtime session client for Parley.
//!
//! This is the library that front-ends embed to talk to a Parley server.
//!
//! ## Features
//!
//! - **Session Loop**: One task owns every store; the UI sends [`Intent`]s
//!   and listens for [`SessionEvent`]s
//! - **Resilient Connection**: Bounded reconnects, rejoin of the active
//!   conversation, acknowledgement timeouts
//! - **Transport Abstraction**: Pluggable transport layer (WebSocket, mock)
//! - **Pure State Machines**: Uses chat-core for side-effect-free logic
//!
//! ## Example
//!
//! ```ignore
//! use parley_chat_client::{
//!     restore_session, ChatSession, ClientConfig, HttpApi, Intent, TokenStore,
//!     WebSocketTransport,
//! };
//!
//! let config = ClientConfig::default();
//! let store = TokenStore::new(data_dir);
//! let token = store.load().await?.expect("logged in");
//! let api = HttpApi::new(&config.api_url, token);
//! let session = restore_session(&store, &api).await?.expect("token accepted");
//!
//! let mut chat = ChatSession::new(config, session, WebSocketTransport::new(), api);
//! let handle = chat.handle();
//! tokio::spawn(async move { chat.run().await });
//!
//! handle.send(Intent::SelectConversation(Some(conversation)))?;
//! handle.send(Intent::SendMessage("hello".into()))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod connection;
mod error;
pub mod session;
pub mod store;
pub mod timers;
pub mod transport;

pub use api::{ApiError, ChatApi, HttpApi, MockApi};
pub use config::{ClientConfig, DEFAULT_ACK_TIMEOUT};
pub use connection::{AckPurpose, AckRegistry, ConnectionManager, ConnectionOutput};
pub use error::ClientError;
pub use session::{ChatSession, Intent, SessionEvent, SessionHandle};
pub use store::{restore_session, StoreError, TokenStore};
pub use timers::{Timer, TimerKind, Timers};
pub use transport::{MockTransport, Transport, TransportError, WebSocketTransport};
