//! # px-exchange
//!
//! Upstream exchange boundary for the price cache service.
//!
//! Each exchange implements the [`Exchange`] trait, which exposes the
//! paginated 1-minute history API, the tradable symbol set, a best bid/ask
//! query, and the address/decoder of its live trade stream.
//!
//! ## Supported exchanges
//!
//! | Exchange | Module    | History            | Ticks            |
//! |----------|-----------|--------------------|------------------|
//! | Binance  | `binance` | `/api/v3/klines`   | `@aggTrade` WS   |

pub mod binance;

use std::sync::Arc;

use async_trait::async_trait;
use px_core::config::ExchangeConfig;
use px_core::{Kline, OrderbookSnapshot, PriceTick, PxError, SymbolSet};

/// Trait implemented by all upstream exchange clients.
///
/// All methods take `&self` so one client can be shared by the sync workers,
/// the stream hubs and the HTTP handlers concurrently.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Exchange identifier used in URL paths and cache directories.
    fn name(&self) -> &str;

    /// Fetch up to `limit` 1-minute klines whose open time is `>= start_ms`,
    /// in ascending order.
    ///
    /// Returns [`PxError::SymbolNotFound`] for a symbol the exchange does not
    /// know.
    async fn klines(&self, symbol: &str, start_ms: i64, limit: u32) -> Result<Vec<Kline>, PxError>;

    /// Re-read the tradable symbol set from the exchange and make it the
    /// set [`check_symbol`](Exchange::check_symbol) answers from.
    async fn refresh_symbols(&self) -> Result<SymbolSet, PxError>;

    /// The most recently fetched tradable symbol set.
    fn symbols(&self) -> SymbolSet;

    /// `Ok(())` if `symbol` is currently tradable.
    fn check_symbol(&self, symbol: &str) -> Result<(), PxError>;

    /// Fetch the current best bid/ask.
    async fn orderbook(&self, symbol: &str) -> Result<OrderbookSnapshot, PxError>;

    /// WebSocket URL of the live trade stream for `symbol`.
    fn tick_stream_url(&self, symbol: &str) -> String;

    /// Decode one text frame of the trade stream. `None` for frames that are
    /// not trades or cannot be parsed.
    fn parse_tick(&self, text: &str) -> Option<PriceTick>;
}

/// Create an exchange client based on the `exchange` field in the config.
pub fn create_exchange(config: &ExchangeConfig) -> Result<Arc<dyn Exchange>, PxError> {
    match config.exchange.to_lowercase().as_str() {
        "binance" => Ok(Arc::new(binance::BinanceClient::new(
            binance::config::BinanceConfig::from_exchange(config),
        )?)),
        other => Err(PxError::UnknownExchange(other.to_string())),
    }
}
