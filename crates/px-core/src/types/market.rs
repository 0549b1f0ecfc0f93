//! Live market values: trade ticks, best bid/ask, the tradable symbol set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Symbols currently tradable on one exchange (lower-case).
pub type SymbolSet = BTreeSet<String>;

/// One decoded upstream trade.
///
/// `price` keeps the exchange's decimal string so it can be forwarded to
/// stream clients without float formatting drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTick {
    pub price: String,
    pub quantity: String,
    pub trade_time_ms: i64,
}

impl PriceTick {
    pub fn price_f64(&self) -> Option<f64> {
        self.price.parse().ok()
    }
}

/// Best bid/ask captured from the upstream order book.
///
/// `sell` is what a market sell fills at (best bid), `buy` what a market buy
/// pays (best ask).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrderbookSnapshot {
    pub buy: f64,
    pub sell: f64,
    #[serde(rename = "capturedAt")]
    pub captured_at_ms: i64,
}
