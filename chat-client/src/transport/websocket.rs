//! WebSocket transport over tokio-tungstenite.
//!
//! One JSON text message carries one [`Frame`]. The bearer token travels in
//! the `Authorization` header of the upgrade request.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chat_core::DisconnectCause;
use chat_types::Frame;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Default timeout for the WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// WebSocket-backed [`Transport`].
pub struct WebSocketTransport {
    sink: Mutex<Option<SplitSink<Socket, Message>>>,
    stream: Mutex<Option<SplitStream<Socket>>>,
    connected: AtomicBool,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Create a disconnected transport.
    pub fn new() -> Self {
        Self::with_connect_timeout(DEFAULT_CONNECT_TIMEOUT)
    }

    /// Create a disconnected transport with a custom handshake timeout.
    pub fn with_connect_timeout(connect_timeout: Duration) -> Self {
        Self {
            sink: Mutex::new(None),
            stream: Mutex::new(None),
            connected: AtomicBool::new(false),
            connect_timeout,
        }
    }

    fn mark_closed(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("connected", &self.is_connected())
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<(), TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid url {url}: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| TransportError::ConnectionFailed(format!("invalid token: {e}")))?;
        request.headers_mut().insert("Authorization", bearer);

        let (socket, _response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| TransportError::ConnectionFailed("handshake timed out".into()))?
                .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;

        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        *self.stream.lock().await = Some(stream);
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!(url, "websocket connected");
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let text = frame.to_text()?;
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = sink.send(Message::text(text)).await {
            self.mark_closed();
            return Err(TransportError::SendFailed(e.to_string()));
        }
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or(TransportError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match Frame::from_text(text.as_str()) {
                    Ok(frame) => return Ok(frame),
                    Err(e) => {
                        tracing::warn!("dropping undecodable frame: {}", e);
                    }
                },
                Some(Ok(Message::Close(close))) => {
                    self.mark_closed();
                    let reason = close
                        .as_ref()
                        .map(|c| c.reason.to_string())
                        .unwrap_or_else(|| "server closed connection".into());
                    // A deliberate close from the server (as opposed to a
                    // dropped socket) asks the client to come straight back.
                    let cause = match close.map(|c| c.code) {
                        Some(CloseCode::Away) | Some(CloseCode::Normal) | None => {
                            DisconnectCause::Server
                        }
                        Some(_) => DisconnectCause::Transport,
                    };
                    return Err(TransportError::Closed { cause, reason });
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.mark_closed();
                    return Err(TransportError::Closed {
                        cause: DisconnectCause::Transport,
                        reason: e.to_string(),
                    });
                }
                None => {
                    self.mark_closed();
                    return Err(TransportError::Closed {
                        cause: DisconnectCause::Transport,
                        reason: "stream ended".into(),
                    });
                }
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.mark_closed();
        let sink = self.sink.lock().await.take();
        self.stream.lock().await.take();
        if let Some(mut sink) = sink {
            sink.close()
                .await
                .map_err(|e| TransportError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }
}
