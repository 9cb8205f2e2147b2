//! Mock transport for testing.
//!
//! Allows feeding inbound frames and capturing sent frames for verification.

use super::{Transport, TransportError};
use async_trait::async_trait;
use chat_core::DisconnectCause;
use chat_types::{AckId, ChatError, Frame, Inbound};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

enum Incoming {
    Frame(Frame),
    Drop {
        cause: DisconnectCause,
        reason: String,
    },
}

/// Mock transport for testing.
///
/// Inbound frames pushed with [`push_frame`](Self::push_frame) are returned
/// by `recv()` in order; `recv()` waits while the queue is empty.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
    incoming_tx: mpsc::UnboundedSender<Incoming>,
    incoming_rx: Arc<AsyncMutex<mpsc::UnboundedReceiver<Incoming>>>,
}

#[derive(Debug, Default)]
struct MockTransportInner {
    connected: bool,
    connected_url: Option<String>,
    token: Option<String>,
    connect_attempts: usize,
    sent_frames: Vec<Frame>,
    fail_connects: VecDeque<String>,
    fail_next_send: Option<String>,
}

impl MockTransport {
    /// Create a new mock transport.
    pub fn new() -> Self {
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Mutex::new(MockTransportInner::default())),
            incoming_tx,
            incoming_rx: Arc::new(AsyncMutex::new(incoming_rx)),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockTransportInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a frame to be returned by `recv()`.
    pub fn push_frame(&self, frame: Frame) {
        let _ = self.incoming_tx.send(Incoming::Frame(frame));
    }

    /// Queue a server event.
    pub fn push_event(&self, event: Inbound) -> Result<(), ChatError> {
        self.push_frame(event.into_frame()?);
        Ok(())
    }

    /// Queue an acknowledgement reply.
    pub fn push_ack(&self, ack: AckId, data: Value) {
        self.push_frame(Frame::Ack { ack, data });
    }

    /// Make `recv()` report a closed connection after the frames queued so far.
    pub fn simulate_drop(&self, cause: DisconnectCause, reason: &str) {
        let _ = self.incoming_tx.send(Incoming::Drop {
            cause,
            reason: reason.to_string(),
        });
    }

    /// Get all frames that were sent.
    pub fn sent_frames(&self) -> Vec<Frame> {
        self.lock().sent_frames.clone()
    }

    /// Names of all sent events, in order.
    pub fn sent_events(&self) -> Vec<String> {
        self.lock()
            .sent_frames
            .iter()
            .filter_map(|f| f.event_name().map(str::to_string))
            .collect()
    }

    /// Sent frames carrying the given event name.
    pub fn sent_named(&self, name: &str) -> Vec<Frame> {
        self.lock()
            .sent_frames
            .iter()
            .filter(|f| f.event_name() == Some(name))
            .cloned()
            .collect()
    }

    /// Get the last frame that was sent.
    pub fn last_sent(&self) -> Option<Frame> {
        self.lock().sent_frames.last().cloned()
    }

    /// Forget all sent frames.
    pub fn clear_sent(&self) {
        self.lock().sent_frames.clear();
    }

    /// Get the URL that was connected to.
    pub fn connected_url(&self) -> Option<String> {
        self.lock().connected_url.clone()
    }

    /// Get the token used for the last connection.
    pub fn token(&self) -> Option<String> {
        self.lock().token.clone()
    }

    /// Number of `connect()` calls so far, failed ones included.
    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }

    /// Cause the next connect() to fail with the given error.
    ///
    /// Calling this repeatedly queues several failures.
    pub fn fail_next_connect(&self, error: &str) {
        self.lock().fail_connects.push_back(error.to_string());
    }

    /// Cause the next send() to fail with the given error.
    pub fn fail_next_send(&self, error: &str) {
        self.lock().fail_next_send = Some(error.to_string());
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("inner", &*self.lock())
            .finish()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&self, url: &str, token: &str) -> Result<(), TransportError> {
        let mut inner = self.lock();
        inner.connect_attempts += 1;

        // Check for forced failure
        if let Some(error) = inner.fail_connects.pop_front() {
            return Err(TransportError::ConnectionFailed(error));
        }

        inner.connected = true;
        inner.connected_url = Some(url.to_string());
        inner.token = Some(token.to_string());
        Ok(())
    }

    async fn send(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut inner = self.lock();

        if !inner.connected {
            return Err(TransportError::NotConnected);
        }

        // Check for forced failure
        if let Some(error) = inner.fail_next_send.take() {
            return Err(TransportError::SendFailed(error));
        }

        inner.sent_frames.push(frame.clone());
        Ok(())
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }

        let mut rx = self.incoming_rx.lock().await;
        match rx.recv().await {
            Some(Incoming::Frame(frame)) => Ok(frame),
            Some(Incoming::Drop { cause, reason }) => {
                self.lock().connected = false;
                Err(TransportError::Closed { cause, reason })
            }
            None => Err(TransportError::Closed {
                cause: DisconnectCause::Transport,
                reason: "mock channel closed".into(),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.lock().connected = false;
        Ok(())
    }
}
