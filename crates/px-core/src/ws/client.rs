//! Single upstream WebSocket connection with supervised reconnect.
//!
//! Each `WsConnection` runs as a tokio task driving an explicit state machine:
//!
//! ```text
//! Disconnected ──► Connecting ──► Streaming ──► Disconnected ──(backoff)──► Connecting ...
//!                      │                                ▲
//!                      └──────── connect failed ────────┘
//! ```
//!
//! Text frames are handed to a callback; the callback never blocks the read
//! loop. Reconnection is retried indefinitely at a fixed backoff until the
//! connection is stopped.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tracing::{debug, error, info, warn};

use crate::error::PxError;

/// Callback invoked for each received text message.
pub type OnMessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Lifecycle state of an upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Disconnected,
    Connecting,
    Streaming,
}

/// Configuration for a single WebSocket connection.
#[derive(Debug, Clone)]
pub struct WsConnConfig {
    /// Full WebSocket URL (e.g. `wss://stream.binance.com:9443/ws/btcusdt@aggTrade`).
    pub url: String,
    /// Fixed delay between a disconnect and the next connect attempt.
    pub reconnect_backoff: Duration,
    /// Tag used in log lines.
    pub label: String,
}

/// A single WebSocket connection managed by a background tokio task.
pub struct WsConnection {
    pub config: WsConnConfig,
    state_tx: Arc<watch::Sender<ConnState>>,
    shutdown_tx: Option<watch::Sender<bool>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl WsConnection {
    /// Create a new (not yet started) connection.
    pub fn new(config: WsConnConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnState::Disconnected);
        Self {
            config,
            state_tx: Arc::new(state_tx),
            shutdown_tx: None,
            task: None,
        }
    }

    /// Watch the connection state.
    pub fn state(&self) -> watch::Receiver<ConnState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Start the connection task. Text frames are forwarded to `on_text`.
    pub fn start(&mut self, on_text: OnMessageCallback) {
        if self.task.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = self.config.clone();
        let state_tx = Arc::clone(&self.state_tx);

        let task = tokio::spawn(async move {
            connection_loop(config, on_text, state_tx, shutdown_rx).await;
        });

        self.shutdown_tx = Some(shutdown_tx);
        self.task = Some(task);
    }

    /// Stop the connection and wait for the task to finish.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(true);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        self.state_tx.send_replace(ConnState::Disconnected);
    }
}

/// Why a streaming session ended.
enum SessionEnd {
    Shutdown,
    Dropped,
}

/// Supervisor loop: connect, stream, back off, repeat until shutdown.
async fn connection_loop(
    config: WsConnConfig,
    on_text: OnMessageCallback,
    state_tx: Arc<watch::Sender<ConnState>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let label = &config.label;

    loop {
        if *shutdown_rx.borrow() {
            info!("[{label}] shutdown requested");
            break;
        }

        state_tx.send_replace(ConnState::Connecting);
        debug!("[{label}] connecting to {}", config.url);

        let connected = tokio::select! {
            res = connect_ws(&config.url) => res,
            _ = shutdown_rx.changed() => break,
        };

        match connected {
            Ok(stream) => {
                state_tx.send_replace(ConnState::Streaming);
                info!("[{label}] connected");
                let end = stream_session(label, stream, &on_text, &mut shutdown_rx).await;
                if let SessionEnd::Shutdown = end {
                    break;
                }
            }
            Err(e) => error!("[{label}] connection failed: {e}"),
        }

        state_tx.send_replace(ConnState::Disconnected);
        warn!("[{label}] disconnected, reconnecting in {:?}", config.reconnect_backoff);
        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_backoff) => {},
            _ = shutdown_rx.changed() => break,
        }
    }

    state_tx.send_replace(ConnState::Disconnected);
}

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Read frames until the peer goes away or shutdown is signalled.
async fn stream_session(
    label: &str,
    stream: WsStream,
    on_text: &OnMessageCallback,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let (mut ws_write, mut ws_read) = stream.split();

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                info!("[{label}] shutdown signal received");
                let _ = ws_write.close().await;
                return SessionEnd::Shutdown;
            }

            msg = ws_read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => on_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = ws_write.send(Message::Pong(data)).await {
                            error!("[{label}] pong send error: {e}");
                            return SessionEnd::Dropped;
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        warn!("[{label}] received close frame");
                        return SessionEnd::Dropped;
                    }
                    Some(Err(e)) => {
                        error!("[{label}] read error: {e}");
                        return SessionEnd::Dropped;
                    }
                    None => {
                        warn!("[{label}] stream ended");
                        return SessionEnd::Dropped;
                    }
                    _ => {} // Binary, Pong, Frame
                }
            }
        }
    }
}

/// Establish a (possibly TLS) WebSocket connection.
async fn connect_ws(url: &str) -> Result<WsStream, PxError> {
    let request = url
        .into_client_request()
        .map_err(|e| PxError::WebSocket(format!("bad url {url}: {e}")))?;
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(|e| PxError::WebSocket(e.to_string()))?;
    Ok(stream)
}
