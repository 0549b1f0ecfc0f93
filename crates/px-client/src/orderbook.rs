//! Orderbook prices with a local time-to-live.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use px_core::{OrderbookSnapshot, PxError};
use tokio::time::Instant;
use tracing::debug;

use crate::http::ServiceHttp;

/// Serves the last fetched snapshot of a symbol until it is older than
/// `refresh`, then asks the service again.
pub struct OrderbookClient {
    http: ServiceHttp,
    refresh: Duration,
    cached: Mutex<AHashMap<String, (Instant, OrderbookSnapshot)>>,
}

impl OrderbookClient {
    pub fn new(http: ServiceHttp, refresh: Duration) -> Self {
        Self {
            http,
            refresh,
            cached: Mutex::new(AHashMap::new()),
        }
    }

    pub async fn get(&self, symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        let symbol = symbol.to_lowercase();
        let fresh = self
            .cached()
            .get(&symbol)
            .filter(|(at, _)| at.elapsed() <= self.refresh)
            .map(|(_, snap)| *snap);
        if let Some(snap) = fresh {
            return Ok(snap);
        }

        let snap: OrderbookSnapshot = self.http.get_json("orderbookPrice", &symbol).await?;
        debug!("[client] {symbol}: orderbook buy {} sell {}", snap.buy, snap.sell);
        self.cached().insert(symbol, (Instant::now(), snap));
        Ok(snap)
    }

    fn cached(&self) -> MutexGuard<'_, AHashMap<String, (Instant, OrderbookSnapshot)>> {
        self.cached.lock().unwrap_or_else(|e| e.into_inner())
    }
}
