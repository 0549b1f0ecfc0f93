//! Client settings.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Where the service lives and how the client caches what it reads.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// `host:port` of the price service.
    pub host: String,
    /// Exchange path segment of every route.
    pub exchange: String,
    /// Root of the local history cache; each exchange gets a subdirectory.
    pub cache_dir: PathBuf,
    /// Maximum age of a locally cached orderbook price.
    pub orderbook_refresh_ms: u64,
    pub request_timeout_ms: u64,
    /// Delay before a dropped price stream is reconnected.
    pub reconnect_backoff_ms: u64,
    /// Prices buffered per stream receiver before the oldest are skipped.
    pub stream_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:8080".into(),
            exchange: "binance".into(),
            cache_dir: PathBuf::from("/symbolscache"),
            orderbook_refresh_ms: 5_000,
            request_timeout_ms: 10_000,
            reconnect_backoff_ms: 5_000,
            stream_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn orderbook_refresh(&self) -> Duration {
        Duration::from_millis(self.orderbook_refresh_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}
