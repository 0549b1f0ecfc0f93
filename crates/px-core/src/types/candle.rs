//! Time-bucketed price/volume samples.

use serde::{Deserialize, Serialize};

/// Width of one time bucket in milliseconds (1 minute).
pub const BUCKET_MS: i64 = 60_000;

/// One stored bucket: a representative price and the traded volume.
///
/// Record `i` of a symbol's candle file is the bucket starting at
/// `position.start + i * BUCKET_MS`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Candle {
    pub price: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(price: f64, volume: f64) -> Self {
        Self { price, volume }
    }
}

/// A full OHLCV bucket as delivered by the upstream history API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    /// Bucket open time (ms epoch).
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl From<&Kline> for Candle {
    /// The stored price is the midpoint of the bucket's range.
    fn from(k: &Kline) -> Self {
        Candle {
            price: (k.high + k.low) / 2.0,
            volume: k.volume,
        }
    }
}

/// Round `ts` down to the start of its bucket.
#[inline]
pub fn align_to_bucket(ts: i64) -> i64 {
    ts - ts.rem_euclid(BUCKET_MS)
}
