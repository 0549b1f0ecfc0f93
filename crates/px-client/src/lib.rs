//! # px-client
//!
//! Consumer side of the price cache service, for processes that read
//! prices from it instead of from the exchange.
//!
//! - **Local history** (`history`): a second-level candle cache on the
//!   consumer's disk, topped up from the service's binary history route
//! - **Price streams** (`stream`): one reconnecting subscription per symbol
//!   to the service's price stream, with the last seen price per symbol
//! - **Orderbook prices** (`orderbook`): best bid/ask with a local TTL
//!
//! ```text
//! {cache_dir}/{exchange}/symbols.json
//! {cache_dir}/{exchange}/prices/{symbol}
//! ```

pub mod config;
pub mod history;
pub mod http;
pub mod orderbook;
pub mod stream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use px_core::{HistoryWindow, OrderbookSnapshot, PxError};
use tokio::sync::broadcast;

pub use config::ClientConfig;
pub use history::LocalHistory;
pub use http::ServiceHttp;
pub use orderbook::OrderbookClient;
pub use stream::PriceStreams;

/// Everything a consumer needs from one exchange of the price service.
pub struct PricesClient {
    exchange: String,
    history: LocalHistory,
    orderbooks: Arc<OrderbookClient>,
    streams: PriceStreams,
}

impl PricesClient {
    /// Open the local cache for `config.exchange`. No request is made yet.
    pub fn open(config: &ClientConfig) -> Result<Self, PxError> {
        let http = ServiceHttp::new(config)?;
        let exchange = config.exchange.to_lowercase();
        let history = LocalHistory::open(&config.cache_dir.join(&exchange), http.clone())?;
        let orderbooks = Arc::new(OrderbookClient::new(http.clone(), config.orderbook_refresh()));
        let streams = PriceStreams::new(http, Arc::clone(&orderbooks), config);
        Ok(Self { exchange, history, orderbooks, streams })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Pair symbol for `base`/`quote` as the service names it.
    pub fn to_symbol(&self, base: &str, quote: &str) -> String {
        format!("{base}{quote}").to_lowercase()
    }

    pub fn history(&self) -> &LocalHistory {
        &self.history
    }

    /// Candles of `symbol` in `[start, end)`; see [`LocalHistory::symbol_history`].
    pub async fn symbol_history(
        &self,
        symbol: &str,
        start: i64,
        end: i64,
    ) -> Result<HistoryWindow, PxError> {
        self.history.symbol_history(symbol, start, end).await
    }

    pub async fn orderbook_price(&self, symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        self.orderbooks.get(symbol).await
    }

    /// Subscribe to the live prices of `symbol`, opening its stream if needed.
    pub async fn init_stream(&self, symbol: &str) -> Result<broadcast::Receiver<f64>, PxError> {
        self.streams.subscribe(symbol).await
    }

    /// Last price seen on the stream of `symbol`; `None` before
    /// [`init_stream`](Self::init_stream).
    pub fn stream_recent_price(&self, symbol: &str) -> Option<f64> {
        self.streams.recent_price(symbol)
    }

    /// Close every price stream.
    pub async fn close(&self) {
        self.streams.stop_all().await;
    }
}
