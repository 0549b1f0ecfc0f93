use std::sync::Arc;

use ahash::AHashMap;
use px_core::PxError;
use px_exchange::Exchange;
use px_history::ExchangeHistory;
use px_stream::{HubRegistry, OrderbookCache};
use tokio::sync::watch;

/// Everything served for one configured exchange.
pub struct ExchangeState {
    pub exchange: Arc<dyn Exchange>,
    pub history: ExchangeHistory,
    pub hubs: HubRegistry,
    pub orderbooks: OrderbookCache,
}

#[derive(Clone)]
pub struct AppState {
    exchanges: Arc<AHashMap<String, Arc<ExchangeState>>>,
    shutdown: watch::Receiver<bool>,
}

impl AppState {
    pub fn new(
        exchanges: AHashMap<String, Arc<ExchangeState>>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self { exchanges: Arc::new(exchanges), shutdown }
    }

    pub fn exchange(&self, name: &str) -> Result<Arc<ExchangeState>, PxError> {
        self.exchanges
            .get(&name.to_lowercase())
            .cloned()
            .ok_or_else(|| PxError::UnknownExchange(name.to_string()))
    }

    pub fn shutdown(&self) -> watch::Receiver<bool> {
        self.shutdown.clone()
    }

    /// Stop the upstream tick connections of every exchange.
    pub async fn stop_hubs(&self) {
        for ex in self.exchanges.values() {
            ex.hubs.stop_all().await;
        }
    }
}
