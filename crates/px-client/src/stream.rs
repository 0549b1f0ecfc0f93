//! Live prices from the service's price stream.
//!
//! One [`WsConnection`] per symbol, shared by every subscriber through a
//! broadcast channel. A dropped connection is reconnected at a fixed backoff.
//! The last price seen per symbol is kept for polling callers; it starts at
//! the orderbook mid price so it is never empty once a stream exists.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use px_core::PxError;
use px_core::ws::{OnMessageCallback, WsConnConfig, WsConnection};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::http::ServiceHttp;
use crate::orderbook::OrderbookClient;

type LastPrices = Arc<Mutex<AHashMap<String, f64>>>;

struct SymbolStream {
    tx: broadcast::Sender<f64>,
    conn: WsConnection,
}

pub struct PriceStreams {
    http: ServiceHttp,
    orderbooks: Arc<OrderbookClient>,
    backoff: Duration,
    capacity: usize,
    streams: tokio::sync::Mutex<AHashMap<String, SymbolStream>>,
    last: LastPrices,
}

impl PriceStreams {
    pub fn new(http: ServiceHttp, orderbooks: Arc<OrderbookClient>, config: &ClientConfig) -> Self {
        Self {
            http,
            orderbooks,
            backoff: config.reconnect_backoff(),
            capacity: config.stream_capacity.max(1),
            streams: tokio::sync::Mutex::new(AHashMap::new()),
            last: Arc::new(Mutex::new(AHashMap::new())),
        }
    }

    /// Receiver of every price of `symbol` from now on.
    ///
    /// The first subscriber of a symbol checks it against the orderbook
    /// route and opens the connection; a symbol the service does not know
    /// fails with [`PxError::SymbolNotFound`] and opens nothing.
    pub async fn subscribe(&self, symbol: &str) -> Result<broadcast::Receiver<f64>, PxError> {
        let symbol = symbol.to_lowercase();
        let mut streams = self.streams.lock().await;
        if let Some(stream) = streams.get(&symbol) {
            return Ok(stream.tx.subscribe());
        }

        let snap = self.orderbooks.get(&symbol).await?;
        lock_last(&self.last).insert(symbol.clone(), (snap.buy + snap.sell) / 2.0);

        let (tx, rx) = broadcast::channel(self.capacity);
        let mut conn = WsConnection::new(WsConnConfig {
            url: self.http.stream_url(&symbol),
            reconnect_backoff: self.backoff,
            label: format!("client:{symbol}"),
        });
        conn.start(forward_prices(symbol.clone(), tx.clone(), Arc::clone(&self.last)));
        info!("[client] {symbol}: price stream opened");

        streams.insert(symbol, SymbolStream { tx, conn });
        Ok(rx)
    }

    /// Last price of `symbol`, `None` if no stream was ever opened for it.
    pub fn recent_price(&self, symbol: &str) -> Option<f64> {
        lock_last(&self.last).get(&symbol.to_lowercase()).copied()
    }

    /// Symbols with an open stream.
    pub async fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.streams.lock().await.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Stop every connection. Subscribers see their channel close.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, SymbolStream)> = self.streams.lock().await.drain().collect();
        for (symbol, mut stream) in drained {
            stream.conn.stop().await;
            debug!("[client] {symbol}: price stream closed");
        }
    }
}

/// Parse each frame (a JSON string holding the price) and fan it out.
fn forward_prices(
    symbol: String,
    tx: broadcast::Sender<f64>,
    last: LastPrices,
) -> OnMessageCallback {
    Arc::new(move |text: &str| {
        let price = serde_json::from_str::<String>(text)
            .ok()
            .and_then(|s| s.parse::<f64>().ok());
        let Some(price) = price else {
            warn!("[client] {symbol}: unreadable price frame {text:?}");
            return;
        };
        lock_last(&last).insert(symbol.clone(), price);
        // No receivers left is not an error; the stream stays open.
        let _ = tx.send(price);
    })
}

fn lock_last(last: &LastPrices) -> MutexGuard<'_, AHashMap<String, f64>> {
    last.lock().unwrap_or_else(|e| e.into_inner())
}
