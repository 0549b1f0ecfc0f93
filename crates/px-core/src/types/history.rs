//! Cached-range watermarks and windowed history results.

use serde::{Deserialize, Serialize};

use super::candle::{BUCKET_MS, Candle};

/// Inclusive/exclusive bounds of the history cached on disk for one symbol.
///
/// `start == end == 0` means nothing is cached yet. Once the first candle is
/// written `start` never moves and `end` only advances, always by whole
/// buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HistoryPosition {
    pub start: i64,
    pub end: i64,
}

impl HistoryPosition {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// `true` when no candle has been written for the symbol yet.
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Number of records the candle file holds according to this position.
    pub fn records(&self) -> u64 {
        if self.is_empty() { 0 } else { ((self.end - self.start) / BUCKET_MS) as u64 }
    }

    /// Whether `end - start` is a whole number of buckets.
    pub fn is_aligned(&self) -> bool {
        (self.end - self.start) % BUCKET_MS == 0
    }
}

/// A contiguous run of candles read from the store.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HistoryWindow {
    pub start: i64,
    pub end: i64,
    pub candles: Vec<Candle>,
}

impl HistoryWindow {
    /// An empty window anchored at `ts`.
    pub fn empty_at(ts: i64) -> Self {
        Self { start: ts, end: ts, candles: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Reduce the candles to at most `max_size` evenly spaced samples.
    ///
    /// The window bounds are unchanged; only the sampling density drops.
    pub fn downsampled(mut self, max_size: usize) -> Self {
        self.candles = downsample(&self.candles, max_size);
        self
    }

    /// Flatten into the JSON response shape.
    pub fn to_response(&self) -> HistoryResponse {
        HistoryResponse {
            start: self.start,
            end: self.end,
            prices: self.candles.iter().map(|c| c.price).collect(),
            volumes: self.candles.iter().map(|c| c.volume).collect(),
        }
    }
}

/// JSON body returned by the history route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub start: i64,
    pub end: i64,
    pub prices: Vec<f64>,
    pub volumes: Vec<f64>,
}

/// Pick `n` samples at indices `floor(i * len / n)`.
///
/// Identity when `n == 0` or `n >= len`; never upsamples.
pub fn downsample(candles: &[Candle], n: usize) -> Vec<Candle> {
    let len = candles.len();
    if n == 0 || n >= len {
        return candles.to_vec();
    }
    (0..n).map(|i| candles[i * len / n]).collect()
}
