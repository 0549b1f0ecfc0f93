//! Lazily created hubs, one per watched symbol of an exchange.
//!
//! A hub lives for the rest of the process once created; only shutdown
//! stops its upstream connection.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use ahash::AHashMap;
use px_core::PxError;
use px_core::config::ExchangeConfig;
use px_core::ws::WsConnConfig;
use px_exchange::Exchange;
use tracing::info;

use crate::hub::{BroadcastHub, Subscription, TickDecoder};

pub struct HubRegistry {
    exchange: Arc<dyn Exchange>,
    queue_capacity: usize,
    reconnect_backoff: Duration,
    hubs: Mutex<AHashMap<String, Arc<BroadcastHub>>>,
}

impl HubRegistry {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        queue_capacity: usize,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            exchange,
            queue_capacity,
            reconnect_backoff,
            hubs: Mutex::new(AHashMap::new()),
        }
    }

    pub fn from_config(exchange: Arc<dyn Exchange>, cfg: &ExchangeConfig) -> Self {
        Self::new(exchange, cfg.effective_subscriber_queue(), cfg.effective_reconnect_backoff())
    }

    /// Subscribe to the ticks of a tradable `symbol`, starting its hub if needed.
    pub fn subscribe(&self, symbol: &str) -> Result<Subscription, PxError> {
        self.exchange.check_symbol(symbol)?;
        Ok(self.hub(symbol).subscribe())
    }

    /// The hub of `symbol`; created and connected on first use.
    pub fn hub(&self, symbol: &str) -> Arc<BroadcastHub> {
        let mut hubs = self.hubs();
        if let Some(hub) = hubs.get(symbol) {
            return Arc::clone(hub);
        }

        let hub = Arc::new(BroadcastHub::new(symbol, self.queue_capacity));
        let exchange = Arc::clone(&self.exchange);
        let decode: TickDecoder = Arc::new(move |text: &str| exchange.parse_tick(text));
        hub.start_upstream(
            WsConnConfig {
                url: self.exchange.tick_stream_url(symbol),
                reconnect_backoff: self.reconnect_backoff,
                label: format!("{}:{symbol}", self.exchange.name()),
            },
            decode,
        );
        hubs.insert(symbol.to_string(), Arc::clone(&hub));
        hub
    }

    pub fn len(&self) -> usize {
        self.hubs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hubs().is_empty()
    }

    /// Stop every upstream connection and forget the hubs.
    pub async fn stop_all(&self) {
        let hubs: Vec<Arc<BroadcastHub>> = self.hubs().drain().map(|(_, h)| h).collect();
        for hub in &hubs {
            hub.stop().await;
        }
        info!("[{}] stopped {} hubs", self.exchange.name(), hubs.len());
    }

    fn hubs(&self) -> MutexGuard<'_, AHashMap<String, Arc<BroadcastHub>>> {
        self.hubs.lock().unwrap_or_else(|e| e.into_inner())
    }
}
