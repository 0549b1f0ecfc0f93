//! Binance spot market client.
//!
//! # REST endpoints
//!
//! | Operation     | Method | Path                  |
//! |---------------|--------|-----------------------|
//! | Klines (1m)   | GET    | `/api/v3/klines`      |
//! | Exchange info | GET    | `/api/v3/exchangeInfo`|
//! | Order book    | GET    | `/api/v3/depth`       |
//!
//! Live trades come from the raw `<symbol>@aggTrade` stream.

pub mod config;
pub mod parser;

use std::sync::RwLock;

use async_trait::async_trait;
use px_core::{Kline, OrderbookSnapshot, PriceTick, PxError, SymbolSet, time_util};
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use self::config::BinanceConfig;
use crate::Exchange;

/// Binance spot market client.
///
/// Holds the tradable symbol set fetched by the last
/// [`refresh_symbols`](Exchange::refresh_symbols); requests for symbols
/// outside it are rejected without a round trip.
pub struct BinanceClient {
    config: BinanceConfig,
    http: reqwest::Client,
    symbols: RwLock<SymbolSet>,
}

impl BinanceClient {
    /// Create a new client (no requests are made yet).
    pub fn new(config: BinanceConfig) -> Result<Self, PxError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PxError::Config(format!("http client: {e}")))?;
        Ok(Self {
            config,
            http,
            symbols: RwLock::new(SymbolSet::new()),
        })
    }

    /// Issue a public GET and decode the JSON body.
    ///
    /// Transport failures (including timeouts) map to [`PxError::Upstream`];
    /// an `Invalid symbol` rejection maps to [`PxError::SymbolNotFound`];
    /// any other non-200 status maps to [`PxError::Exchange`].
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, String)],
        symbol: Option<&str>,
    ) -> Result<serde_json::Value, PxError> {
        let url = format!("{}{}", self.config.rest_url, path);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| PxError::Upstream(format!("GET {path}: {e}")))?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| PxError::Upstream(format!("GET {path} body: {e}")))?;

        if status == StatusCode::OK {
            return Ok(serde_json::from_str(&body)?);
        }

        if status == StatusCode::BAD_REQUEST
            && parser::error_code(&body) == Some(parser::INVALID_SYMBOL_CODE)
        {
            if let Some(sym) = symbol {
                return Err(PxError::SymbolNotFound(sym.to_string()));
            }
        }

        warn!("[{}] GET {path} -> {status}: {body}", self.config.name);
        Err(PxError::Exchange(format!("GET {path}: HTTP {status}")))
    }
}

#[async_trait]
impl Exchange for BinanceClient {
    fn name(&self) -> &str {
        &self.config.name
    }

    async fn klines(&self, symbol: &str, start_ms: i64, limit: u32) -> Result<Vec<Kline>, PxError> {
        self.check_symbol(symbol)?;

        let query = [
            ("symbol", symbol.to_uppercase()),
            ("interval", "1m".to_string()),
            ("startTime", start_ms.to_string()),
            ("limit", limit.to_string()),
        ];
        let body = self.get_json("/api/v3/klines", &query, Some(symbol)).await?;
        let klines = parser::parse_klines(&body)?;
        debug!("[{}] {symbol}: {} klines from {start_ms}", self.config.name, klines.len());
        Ok(klines)
    }

    async fn refresh_symbols(&self) -> Result<SymbolSet, PxError> {
        let info = self.get_json("/api/v3/exchangeInfo", &[], None).await?;
        let set = parser::parse_exchange_info(&info, &self.config.quote_assets);
        if set.is_empty() {
            return Err(PxError::Exchange("could not fetch symbols".into()));
        }

        info!("[{}] {} tradable symbols", self.config.name, set.len());
        *self.symbols.write().unwrap_or_else(|e| e.into_inner()) = set.clone();
        Ok(set)
    }

    fn symbols(&self) -> SymbolSet {
        self.symbols.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), PxError> {
        if self.symbols.read().unwrap_or_else(|e| e.into_inner()).contains(symbol) {
            Ok(())
        } else {
            Err(PxError::SymbolNotFound(symbol.to_string()))
        }
    }

    async fn orderbook(&self, symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        self.check_symbol(symbol)?;

        let query = [("symbol", symbol.to_uppercase()), ("limit", "5".to_string())];
        let body = self.get_json("/api/v3/depth", &query, Some(symbol)).await?;
        let (best_bid, best_ask) = parser::parse_depth_top(&body)?;
        Ok(OrderbookSnapshot {
            buy: best_ask,
            sell: best_bid,
            captured_at_ms: time_util::now_ms(),
        })
    }

    fn tick_stream_url(&self, symbol: &str) -> String {
        format!("{}/{}@aggTrade", self.config.ws_url, symbol.to_lowercase())
    }

    fn parse_tick(&self, text: &str) -> Option<PriceTick> {
        parser::parse_agg_trade(text)
    }
}
