//! Binance-specific configuration extraction.

use std::time::Duration;

use px_core::config::ExchangeConfig;

/// Parsed Binance configuration.
#[derive(Debug, Clone)]
pub struct BinanceConfig {
    pub name: String,
    /// REST API base URL.
    pub rest_url: String,
    /// Market stream WebSocket base URL (single raw streams).
    pub ws_url: String,
    /// Upper-case quote assets whose spot pairs are tracked.
    pub quote_assets: Vec<String>,
    pub request_timeout: Duration,
}

impl BinanceConfig {
    pub fn from_exchange(cfg: &ExchangeConfig) -> Self {
        Self {
            name: cfg.exchange.to_lowercase(),
            rest_url: cfg.rest_url.clone().unwrap_or_else(default_rest_url),
            ws_url: cfg.ws_url.clone().unwrap_or_else(default_ws_url),
            quote_assets: cfg.quote_assets.iter().map(|q| q.to_uppercase()).collect(),
            request_timeout: cfg.effective_request_timeout(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            name: "binance".into(),
            rest_url: default_rest_url(),
            ws_url: default_ws_url(),
            quote_assets: vec!["USDT".into()],
            request_timeout: Duration::from_secs(10),
        }
    }
}

fn default_rest_url() -> String {
    "https://api.binance.com".into()
}

fn default_ws_url() -> String {
    "wss://stream.binance.com:9443/ws".into()
}
