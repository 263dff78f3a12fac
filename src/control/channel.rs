//! Persistent WebSocket connection to the controller.
//!
//! # Responsibilities
//! - Establish the control connection, retrying at startup until it succeeds
//! - Forward inbound text frames as [`ChannelEvent::Message`]
//! - Serialize outbound messages onto the socket in submission order
//! - Reconnect after any disconnect with a fixed delay, unbounded attempts
//!
//! # Data Flow
//! ```text
//! Controller ──frames──▶ session reader ──ChannelEvent──▶ Dispatcher
//! Dispatcher ──Outbox::transmit──▶ outbound queue ──▶ session writer ──▶ Controller
//! ```
//!
//! # Design Decisions
//! - One supervisor task owns the socket; reconnects never spawn new supervisors
//! - `send` never blocks and never fails loudly: it returns `false` when offline
//! - `Disconnected` is emitted once per lost connection, not per failed retry

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::config::ControlConfig;
use crate::control::protocol::OutboundMessage;
use crate::observability::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Control channel connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
}

impl From<u8> for ConnectionState {
    fn from(value: u8) -> Self {
        match value {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Connected,
            _ => ConnectionState::Disconnected,
        }
    }
}

/// Events surfaced to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Connected,
    Disconnected,
    /// A text frame from the controller.
    Message(String),
}

/// Transport-level failures. These drive reconnects and never surface per operation.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("control channel closed")]
    Closed,
}

/// Destination for outgoing control messages.
pub trait Outbox: Send + Sync {
    /// Queue a message for the controller. Returns `false` when it cannot be sent.
    fn transmit(&self, message: &OutboundMessage) -> bool;
}

/// Handle to the control connection. Cheap to clone.
#[derive(Clone)]
pub struct ControlChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: ControlConfig,
    state: AtomicU8,
    reconnect_attempts: AtomicU32,
    supervised: AtomicBool,
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for ControlChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlChannel")
            .field("endpoint", &self.inner.config.endpoint)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish_non_exhaustive()
    }
}

impl ControlChannel {
    /// Create a channel and the receiver for its events.
    pub fn new(config: ControlConfig) -> (Self, mpsc::UnboundedReceiver<ChannelEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let inner = Inner {
            config,
            state: AtomicU8::new(ConnectionState::Disconnected as u8),
            reconnect_attempts: AtomicU32::new(0),
            supervised: AtomicBool::new(false),
            outbound: Mutex::new(None),
            events,
            shutdown: CancellationToken::new(),
        };
        (Self { inner: Arc::new(inner) }, events_rx)
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.inner.state.load(Ordering::SeqCst))
    }

    /// Reconnect attempts since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// Open the connection and start the supervisor that keeps it alive.
    ///
    /// Resolves once the WebSocket handshake completes. Once supervised,
    /// reconnection is handled internally and further calls return immediately.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        if self.inner.supervised.load(Ordering::SeqCst) {
            tracing::debug!("Control channel already supervised");
            return Ok(());
        }
        if self.inner.shutdown.is_cancelled() {
            return Err(ChannelError::Closed);
        }

        let (ws, outbound_rx) = self.inner.open().await?;
        self.inner.supervised.store(true, Ordering::SeqCst);
        tokio::spawn(supervise(self.inner.clone(), ws, outbound_rx));
        Ok(())
    }

    /// Connect, retrying with the configured startup delay until it succeeds
    /// or the channel is closed.
    pub async fn establish(&self) -> Result<(), ChannelError> {
        let delay = self.inner.config.connect_retry_delay();
        loop {
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(ChannelError::Closed) => return Err(ChannelError::Closed),
                Err(e) => {
                    tracing::warn!(error = %e, delay = ?delay, "Failed to reach controller, retrying");
                }
            }

            tokio::select! {
                _ = self.inner.shutdown.cancelled() => return Err(ChannelError::Closed),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Send a message to the controller. Returns `false` if not connected.
    pub fn send(&self, message: &OutboundMessage) -> bool {
        if self.state() != ConnectionState::Connected {
            tracing::warn!(request_id = %message.request_id(), "Cannot send: control channel not connected");
            return false;
        }

        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode outbound message");
                return false;
            }
        };

        let outbound = match self.inner.outbound.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match outbound.as_ref() {
            Some(tx) => tx.send(Message::Text(payload.into())).is_ok(),
            None => false,
        }
    }

    /// Close the connection and stop reconnecting.
    pub fn close(&self) {
        self.inner.shutdown.cancel();
    }
}

impl Outbox for ControlChannel {
    fn transmit(&self, message: &OutboundMessage) -> bool {
        self.send(message)
    }
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::SeqCst);
    }

    fn emit(&self, event: ChannelEvent) {
        // Nobody listening is not an error for the transport.
        let _ = self.events.send(event);
    }

    /// Perform the WebSocket handshake and install a fresh outbound queue.
    async fn open(&self) -> Result<(WsStream, mpsc::UnboundedReceiver<Message>), ChannelError> {
        self.set_state(ConnectionState::Connecting);
        tracing::info!(endpoint = %self.config.endpoint, "Connecting to controller");

        let ws = match connect_async(self.config.endpoint.as_str()).await {
            Ok((ws, _response)) => ws,
            Err(source) => {
                self.set_state(ConnectionState::Disconnected);
                return Err(ChannelError::Connect {
                    endpoint: self.config.endpoint.clone(),
                    source,
                });
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        match self.outbound.lock() {
            Ok(mut guard) => *guard = Some(tx),
            Err(poisoned) => *poisoned.into_inner() = Some(tx),
        }
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        self.set_state(ConnectionState::Connected);
        tracing::info!(endpoint = %self.config.endpoint, "Control channel connected");
        self.emit(ChannelEvent::Connected);

        Ok((ws, rx))
    }

    fn detach(&self) {
        match self.outbound.lock() {
            Ok(mut guard) => *guard = None,
            Err(poisoned) => *poisoned.into_inner() = None,
        }
        self.set_state(ConnectionState::Disconnected);
        tracing::warn!(endpoint = %self.config.endpoint, "Control channel disconnected");
        self.emit(ChannelEvent::Disconnected);
    }

    /// Pump frames in both directions until the socket drops or shutdown.
    async fn run_session(&self, ws: WsStream, mut outbound: mpsc::UnboundedReceiver<Message>) {
        let (mut sink, mut stream) = ws.split();

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
                outgoing = outbound.recv() => {
                    let Some(message) = outgoing else { break };
                    if let Err(e) = sink.send(message).await {
                        tracing::warn!(error = %e, "Control channel write failed");
                        break;
                    }
                }
                incoming = stream.next() => match incoming {
                    Some(Ok(Message::Text(text))) => {
                        self.emit(ChannelEvent::Message(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => self.emit(ChannelEvent::Message(text)),
                        Err(_) => tracing::warn!(len = bytes.len(), "Dropping non UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(frame = ?frame, "Controller closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "Control channel read failed");
                        break;
                    }
                    None => break,
                },
            }
        }
    }
}

/// Own the socket for the life of the channel, reconnecting after each loss.
async fn supervise(inner: Arc<Inner>, ws: WsStream, outbound: mpsc::UnboundedReceiver<Message>) {
    let delay = inner.config.reconnect_delay();
    let mut session = Some((ws, outbound));

    while let Some((ws, outbound)) = session.take() {
        inner.run_session(ws, outbound).await;
        inner.detach();

        while session.is_none() {
            if inner.shutdown.is_cancelled() {
                break;
            }
            let attempt = inner.reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::record_reconnect();

            tokio::select! {
                _ = inner.shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            tracing::info!(attempt, "Reconnecting to controller");
            match inner.open().await {
                Ok(next) => session = Some(next),
                Err(e) => tracing::warn!(attempt, error = %e, "Reconnect attempt failed"),
            }
        }
    }

    inner.supervised.store(false, Ordering::SeqCst);
    tracing::info!("Control channel supervisor stopped");
}
