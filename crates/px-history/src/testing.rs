//! In-memory [`Exchange`] with scripted klines and failures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use px_core::time_util::now_ms;
use px_core::{Kline, OrderbookSnapshot, PriceTick, PxError, SymbolSet};
use px_exchange::Exchange;

pub struct ScriptedExchange {
    symbols: SymbolSet,
    series: Mutex<AHashMap<String, Vec<Kline>>>,
    /// symbol -> (successful calls left, error to return next)
    failures: Mutex<AHashMap<String, (u32, PxError)>>,
    requests: Mutex<Vec<(String, i64)>>,
    latency: Mutex<Duration>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    on_request: Mutex<Option<RequestHook>>,
}

type RequestHook = Arc<dyn Fn(&str) + Send + Sync>;

impl ScriptedExchange {
    pub fn new(symbols: &[&str]) -> Self {
        Self {
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            series: Mutex::new(AHashMap::new()),
            failures: Mutex::new(AHashMap::new()),
            requests: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            on_request: Mutex::new(None),
        }
    }

    /// Delay every kline response by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    /// Most kline requests that were ever outstanding at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Run `hook` on every kline request for a tradable symbol.
    pub fn on_request(&self, hook: impl Fn(&str) + Send + Sync + 'static) {
        *self.on_request.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Consecutive 1-minute klines from `start` whose midpoint is `prices[i]`.
    pub fn put_series(&self, symbol: &str, start: i64, prices: &[f64]) {
        let klines = prices
            .iter()
            .enumerate()
            .map(|(i, &p)| Kline {
                open_time: start + i as i64 * px_core::BUCKET_MS,
                open: p,
                high: p + 1.0,
                low: p - 1.0,
                close: p,
                volume: 2.0,
            })
            .collect();
        self.series.lock().unwrap().insert(symbol.to_string(), klines);
    }

    /// Let `ok_calls` kline requests for `symbol` succeed, then fail once.
    pub fn fail_after(&self, symbol: &str, ok_calls: u32, err: PxError) {
        self.failures.lock().unwrap().insert(symbol.to_string(), (ok_calls, err));
    }

    /// Number of kline requests for tradable symbols.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested_from(&self, symbol: &str) -> Vec<i64> {
        let requests = self.requests.lock().unwrap();
        requests.iter().filter(|(s, _)| s == symbol).map(|(_, t)| *t).collect()
    }
}

#[async_trait]
impl Exchange for ScriptedExchange {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn klines(&self, symbol: &str, start_ms: i64, limit: u32) -> Result<Vec<Kline>, PxError> {
        self.check_symbol(symbol)?;
        self.requests.lock().unwrap().push((symbol.to_string(), start_ms));
        let hook = self.on_request.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(symbol);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        {
            let mut failures = self.failures.lock().unwrap();
            if let Some((left, _)) = failures.get_mut(symbol) {
                if *left == 0 {
                    let (_, err) = failures.remove(symbol).unwrap();
                    return Err(err);
                }
                *left -= 1;
            }
        }

        let series = self.series.lock().unwrap();
        Ok(series
            .get(symbol)
            .map(|ks| {
                ks.iter()
                    .filter(|k| k.open_time >= start_ms)
                    .take(limit as usize)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn refresh_symbols(&self) -> Result<SymbolSet, PxError> {
        Ok(self.symbols.clone())
    }

    fn symbols(&self) -> SymbolSet {
        self.symbols.clone()
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), PxError> {
        if self.symbols.contains(symbol) {
            Ok(())
        } else {
            Err(PxError::SymbolNotFound(symbol.to_string()))
        }
    }

    async fn orderbook(&self, _symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        Ok(OrderbookSnapshot { buy: 1.0, sell: 1.0, captured_at_ms: now_ms() })
    }

    fn tick_stream_url(&self, symbol: &str) -> String {
        format!("ws://127.0.0.1:1/{symbol}")
    }

    fn parse_tick(&self, _text: &str) -> Option<PriceTick> {
        None
    }
}
