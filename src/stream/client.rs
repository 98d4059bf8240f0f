//! Session stream websocket client.
//!
//! Each [`StreamConnection`] is backed by a background worker that owns the
//! websocket, decodes push messages, and forwards them as [`StreamEvent`]s in
//! arrival order. Reconnects are opt-in via [`StreamOptions::reconnect`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::{debug, info, warn};

use crate::config::{ClientConfig, ConfigError};
use crate::retry::{with_optional_timeout, RetryPolicy};
use crate::stream::proto::ServerMessage;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport tuning for stream connections.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamOptions {
    /// Handshake deadline. `None` waits indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Reconnect policy applied after the socket drops. `max_attempts` bounds
    /// consecutive failed connections. `None` leaves the connection closed.
    pub reconnect: Option<RetryPolicy>,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Some(DEFAULT_CONNECT_TIMEOUT),
            reconnect: None,
        }
    }
}

/// Entry point for opening session streams.
#[derive(Clone, Debug)]
pub struct StreamClient {
    config: ClientConfig,
    options: StreamOptions,
}

impl StreamClient {
    /// Client with default options: 10s handshake deadline, no reconnects.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            options: StreamOptions::default(),
        }
    }

    /// Replaces all transport options.
    pub fn with_options(mut self, options: StreamOptions) -> Self {
        self.options = options;
        self
    }

    /// Enables automatic reconnects with the given backoff policy.
    pub fn with_reconnect(mut self, policy: RetryPolicy) -> Self {
        self.options.reconnect = Some(policy);
        self
    }

    /// Options applied to every connection opened by this client.
    pub fn options(&self) -> &StreamOptions {
        &self.options
    }

    /// Stream address for `session_id`.
    pub fn endpoint(&self, session_id: &str) -> Result<String, ConfigError> {
        self.config.stream_url(session_id)
    }

    /// Opens the stream for `session_id`.
    ///
    /// Returns as soon as the worker is spawned. Handshake failures are
    /// delivered as [`StreamEvent::Error`] followed by [`StreamEvent::Closed`].
    pub fn open(&self, session_id: &str) -> Result<StreamConnection, ConfigError> {
        let url = self.endpoint(session_id)?;
        Ok(StreamConnection::open(url, self.options.clone()))
    }
}

/// Connection lifecycle published by the stream worker.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last attempt failed before or during the session.
    Errored,
    /// The socket closed and no reconnect is pending.
    Closed,
}

/// Item delivered by a [`StreamConnection`].
#[derive(Debug)]
pub enum StreamEvent {
    /// Handshake completed.
    Opened,
    /// Decoded push message.
    Message(ServerMessage),
    /// Transport or decode failure. The channel is not closed by this alone.
    Error(StreamError),
    /// The socket closed.
    Closed,
}

/// Cloneable handle that tears down a stream worker.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    shutdown: Arc<Mutex<Option<oneshot::Sender<()>>>>,
    state: watch::Receiver<ConnectionState>,
}

impl StreamHandle {
    /// Stops the worker and closes the socket. Safe to call repeatedly.
    pub fn disconnect(&self) {
        let sender = match self.shutdown.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// True once [`StreamHandle::disconnect`] has been called on any clone.
    pub fn is_disconnected(&self) -> bool {
        match self.shutdown.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    /// Latest lifecycle state published by the worker.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver for lifecycle changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }
}

/// Live stream for one session.
#[derive(Debug)]
pub struct StreamConnection {
    handle: StreamHandle,
    receiver: mpsc::UnboundedReceiver<StreamEvent>,
}

impl StreamConnection {
    /// Spawns a worker for `url`. Must be called within a tokio runtime.
    pub fn open(url: impl Into<String>, options: StreamOptions) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let url = url.into();
        tokio::spawn(async move {
            stream_connection_worker(url, options, event_tx, state_tx, shutdown_rx).await;
        });

        Self {
            handle: StreamHandle {
                shutdown: Arc::new(Mutex::new(Some(shutdown_tx))),
                state: state_rx,
            },
            receiver: event_rx,
        }
    }

    /// Cloneable handle that can disconnect this stream from another task.
    pub fn handle(&self) -> StreamHandle {
        self.handle.clone()
    }

    /// Latest lifecycle state published by the worker.
    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Receives the next event. `None` once the worker is gone or the
    /// connection was disconnected.
    pub async fn recv(&mut self) -> Option<StreamEvent> {
        if self.handle.is_disconnected() {
            return None;
        }
        self.receiver.recv().await
    }

    /// Stops the worker and discards anything still buffered.
    ///
    /// After this returns `recv` yields `None`. Calling it again is a no-op.
    pub fn disconnect(&mut self) {
        self.handle.disconnect();
        self.receiver.close();
        while self.receiver.try_recv().is_ok() {}
    }
}

impl Drop for StreamConnection {
    fn drop(&mut self) {
        self.handle.disconnect();
    }
}

/// Errors reported by the stream transport.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Websocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] WsError),

    /// A text frame was not a valid stream message.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The handshake did not finish within the configured deadline.
    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// Frame the stream protocol does not allow.
    #[error("protocol error: {0}")]
    Protocol(String),
}

enum SessionOutcome {
    Shutdown,
    /// The socket ended. `opened` records whether the handshake had succeeded.
    Ended { opened: bool },
}

async fn stream_connection_worker(
    url: String,
    options: StreamOptions,
    event_tx: mpsc::UnboundedSender<StreamEvent>,
    state_tx: watch::Sender<ConnectionState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut failed_attempts = 0usize;

    loop {
        let outcome = run_connected_session(
            &url,
            options.connect_timeout,
            &event_tx,
            &state_tx,
            &mut shutdown_rx,
        )
        .await;

        let opened = match outcome {
            SessionOutcome::Shutdown => {
                debug!(event = "stream_shutdown", url = %url);
                state_tx.send_replace(ConnectionState::Disconnected);
                return;
            }
            SessionOutcome::Ended { opened } => opened,
        };

        if opened {
            failed_attempts = 0;
        }
        failed_attempts += 1;

        let Some(policy) = options.reconnect.as_ref() else {
            return;
        };
        if failed_attempts >= policy.max_attempts.max(1) {
            info!(event = "stream_reconnect_exhausted", url = %url, attempts = failed_attempts);
            return;
        }

        let delay = policy.delay_for_attempt(failed_attempts);
        info!(
            event = "stream_reconnect_scheduled",
            url = %url,
            attempt = failed_attempts,
            delay_ms = delay.as_millis() as u64
        );
        tokio::select! {
            _ = &mut shutdown_rx => {
                state_tx.send_replace(ConnectionState::Disconnected);
                return;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn run_connected_session(
    url: &str,
    connect_timeout: Option<Duration>,
    event_tx: &mpsc::UnboundedSender<StreamEvent>,
    state_tx: &watch::Sender<ConnectionState>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> SessionOutcome {
    state_tx.send_replace(ConnectionState::Connecting);

    let connect = with_optional_timeout(connect_timeout, connect_async(url));
    let connected = tokio::select! {
        _ = &mut *shutdown_rx => return SessionOutcome::Shutdown,
        connected = connect => connected,
    };

    let mut socket = match connected {
        Ok(Ok((socket, _response))) => socket,
        Ok(Err(err)) => {
            return fail_before_open(StreamError::WebSocket(err), event_tx, state_tx);
        }
        Err(_) => {
            let limit = connect_timeout.unwrap_or_default();
            return fail_before_open(StreamError::ConnectTimeout(limit), event_tx, state_tx);
        }
    };

    info!(event = "stream_opened", url = %url);
    state_tx.send_replace(ConnectionState::Connected);
    let _ = event_tx.send(StreamEvent::Opened);

    loop {
        tokio::select! {
            _ = &mut *shutdown_rx => {
                let _ = socket.close(None).await;
                return SessionOutcome::Shutdown;
            }
            maybe_inbound = socket.next() => {
                match maybe_inbound {
                    Some(Ok(Message::Text(text))) => match ServerMessage::from_text(&text) {
                        Ok(message) => {
                            let _ = event_tx.send(StreamEvent::Message(message));
                        }
                        Err(err) => {
                            warn!(event = "stream_decode_failed", error = %err);
                            let _ = event_tx.send(StreamEvent::Error(StreamError::Json(err)));
                        }
                    },
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(err) = socket.send(Message::Pong(payload)).await {
                            return end_after_error(StreamError::WebSocket(err), event_tx, state_tx);
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Binary(_))) => {
                        let err = StreamError::Protocol("unexpected binary frame".to_string());
                        warn!(event = "stream_error", error = %err);
                        let _ = event_tx.send(StreamEvent::Error(err));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!(event = "stream_closed", url = %url);
                        state_tx.send_replace(ConnectionState::Closed);
                        let _ = event_tx.send(StreamEvent::Closed);
                        return SessionOutcome::Ended { opened: true };
                    }
                    Some(Err(err)) => {
                        return end_after_error(StreamError::WebSocket(err), event_tx, state_tx);
                    }
                }
            }
        }
    }
}

fn fail_before_open(
    err: StreamError,
    event_tx: &mpsc::UnboundedSender<StreamEvent>,
    state_tx: &watch::Sender<ConnectionState>,
) -> SessionOutcome {
    warn!(event = "stream_connect_failed", error = %err);
    state_tx.send_replace(ConnectionState::Errored);
    let _ = event_tx.send(StreamEvent::Error(err));
    let _ = event_tx.send(StreamEvent::Closed);
    SessionOutcome::Ended { opened: false }
}

fn end_after_error(
    err: StreamError,
    event_tx: &mpsc::UnboundedSender<StreamEvent>,
    state_tx: &watch::Sender<ConnectionState>,
) -> SessionOutcome {
    warn!(event = "stream_error", error = %err);
    state_tx.send_replace(ConnectionState::Errored);
    let _ = event_tx.send(StreamEvent::Error(err));
    let _ = event_tx.send(StreamEvent::Closed);
    SessionOutcome::Ended { opened: true }
}
