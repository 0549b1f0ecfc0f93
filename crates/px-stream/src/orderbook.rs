//! Short-lived cache of best bid/ask per symbol.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use px_core::{OrderbookSnapshot, PxError};
use px_exchange::Exchange;
use tokio::time::Instant;
use tracing::debug;

pub struct OrderbookCache {
    exchange: Arc<dyn Exchange>,
    refresh: Duration,
    entries: Mutex<AHashMap<String, (Instant, OrderbookSnapshot)>>,
}

impl OrderbookCache {
    pub fn new(exchange: Arc<dyn Exchange>, refresh: Duration) -> Self {
        Self { exchange, refresh, entries: Mutex::new(AHashMap::new()) }
    }

    /// The cached snapshot if it is at most `refresh` old, otherwise a fresh
    /// one from upstream. Concurrent misses may each fetch.
    pub async fn get(&self, symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        self.exchange.check_symbol(symbol)?;
        let cached = self.entries().get(symbol).copied();
        if let Some((at, snap)) = cached {
            if at.elapsed() <= self.refresh {
                return Ok(snap);
            }
        }

        let snap = self.exchange.orderbook(symbol).await?;
        debug!("[orderbook] {symbol}: buy={} sell={}", snap.buy, snap.sell);
        self.entries().insert(symbol.to_string(), (Instant::now(), snap));
        Ok(snap)
    }

    fn entries(&self) -> MutexGuard<'_, AHashMap<String, (Instant, OrderbookSnapshot)>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
