//! Configuration parsing for the price cache service.
//!
//! Settings come from a single JSON file. The top-level structure contains
//! service metadata and an `exchanges` array where each entry describes one
//! upstream exchange whose history is cached and whose ticks are streamed.
//!
//! # Example config
//!
//! ```json
//! {
//!   "service": { "module_name": "prices", "listen": "0.0.0.0:8080", "data_dir": "/priceData" },
//!   "exchanges": [{
//!     "exchange": "binance",
//!     "quote_assets": ["TRY", "USDT"],
//!     "sync_interval_secs": 300,
//!     "sync_workers": 10
//!   }]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::PxError;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Service metadata (name, log path, listen address, data directory).
    #[serde(default)]
    pub service: ServiceConfig,

    /// One entry per upstream exchange.
    pub exchanges: Vec<ExchangeConfig>,
}

/// Service metadata block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfig {
    pub module_name: Option<String>,
    pub log_path: Option<String>,
    /// HTTP listen address (default `0.0.0.0:8080`).
    pub listen: Option<String>,
    /// Root directory of the on-disk cache (default `/priceData`).
    pub data_dir: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn module_name(&self) -> String {
        self.module_name.clone().unwrap_or_else(|| "prices".into())
    }

    pub fn listen(&self) -> String {
        self.listen.clone().unwrap_or_else(|| "0.0.0.0:8080".into())
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from("/priceData"))
    }
}

/// A single exchange configuration.
///
/// Every tuning knob is optional; the `effective_*` accessors supply the
/// production defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange identifier, used in URL paths and the cache directory name.
    pub exchange: String,

    /// REST API base URL override.
    pub rest_url: Option<String>,

    /// Tick stream WebSocket base URL override.
    pub ws_url: Option<String>,

    /// Only spot pairs quoted in one of these assets are tracked.
    #[serde(default)]
    pub quote_assets: Vec<String>,

    /// Seconds between two sync passes over the full symbol set.
    pub sync_interval_secs: Option<u64>,

    /// Safety margin subtracted from "now" so open buckets are never ingested.
    pub rollback_margin_secs: Option<u64>,

    /// Maximum candles requested per upstream page.
    pub page_size: Option<u32>,

    /// Size of the sync worker pool.
    pub sync_workers: Option<usize>,

    /// Upstream HTTP request timeout in milliseconds.
    pub request_timeout_ms: Option<u64>,

    /// Delay before a dropped tick stream is reconnected, in milliseconds.
    pub reconnect_backoff_ms: Option<u64>,

    /// Pending ticks buffered per stream subscriber before samples are dropped.
    pub subscriber_queue: Option<usize>,

    /// Maximum age of a cached orderbook snapshot, in milliseconds.
    pub orderbook_refresh_ms: Option<u64>,

    /// Seconds between two refreshes of the tradable symbol set.
    pub symbol_refresh_secs: Option<u64>,

    /// Lower bound for the first history request of a symbol with no cache.
    pub history_floor_ms: Option<i64>,
}

impl ExchangeConfig {
    pub fn effective_sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs.unwrap_or(300))
    }

    pub fn effective_rollback_margin_ms(&self) -> i64 {
        self.rollback_margin_secs.unwrap_or(300) as i64 * 1000
    }

    pub fn effective_page_size(&self) -> u32 {
        self.page_size.unwrap_or(1000).max(1)
    }

    pub fn effective_sync_workers(&self) -> usize {
        self.sync_workers.unwrap_or(10).max(1)
    }

    pub fn effective_request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms.unwrap_or(10_000))
    }

    pub fn effective_reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms.unwrap_or(5_000))
    }

    pub fn effective_subscriber_queue(&self) -> usize {
        self.subscriber_queue.unwrap_or(5).max(1)
    }

    pub fn effective_orderbook_refresh(&self) -> Duration {
        Duration::from_millis(self.orderbook_refresh_ms.unwrap_or(5_000))
    }

    pub fn effective_symbol_refresh(&self) -> Duration {
        Duration::from_secs(self.symbol_refresh_secs.unwrap_or(3_600))
    }

    pub fn effective_history_floor_ms(&self) -> i64 {
        self.history_floor_ms.unwrap_or(0).max(0)
    }

    /// Reject settings the service cannot run with.
    pub fn validate(&self) -> Result<(), PxError> {
        if self.exchange.trim().is_empty() {
            return Err(PxError::Config("exchange name is empty".into()));
        }
        if self.quote_assets.is_empty() {
            return Err(PxError::Config(format!("{}: quote_assets is empty", self.exchange)));
        }
        Ok(())
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: AppConfig = serde_json::from_str(&content)
        .with_context(|| format!("parsing config {}", path.display()))?;
    for ex in &config.exchanges {
        ex.validate()?;
    }
    Ok(config)
}
