//! Local candle cache fed from the service's binary history route.
//!
//! Same on-disk layout as the service's own cache (`symbols.json` plus one
//! record file per symbol). A symbol is fetched whole on first use; after
//! that only the buckets past the cached end are requested, and only when a
//! caller asks for an `end` beyond it.

use std::path::Path;

use px_core::{BUCKET_MS, HistoryPosition, HistoryWindow, PxError, codec};
use px_history::store::run_blocking;
use px_history::{CandleStore, PositionIndex, open_cache_dir};
use tracing::{debug, info, warn};

use crate::http::ServiceHttp;

pub struct LocalHistory {
    http: ServiceHttp,
    index: PositionIndex,
    store: CandleStore,
}

impl LocalHistory {
    /// Open (or create) the cache under `root`.
    pub fn open(root: &Path, http: ServiceHttp) -> Result<Self, PxError> {
        let (index, store) = open_cache_dir(root)?;
        Ok(Self { http, index, store })
    }

    pub fn position(&self, symbol: &str) -> Option<HistoryPosition> {
        self.index.get(&symbol.to_lowercase())
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    /// Candles of `symbol` in `[start, end)`.
    ///
    /// Requests are serialized per symbol. A symbol the service does not know
    /// is dropped from the cache again so it leaves no empty entry behind.
    pub async fn symbol_history(
        &self,
        symbol: &str,
        start: i64,
        end: i64,
    ) -> Result<HistoryWindow, PxError> {
        if end <= start {
            return Err(PxError::DateRange { start, end });
        }
        let symbol = symbol.to_lowercase();
        let lock = self.index.symbol_lock(&symbol);
        let _guard = lock.write().await;

        let known = self.index.get(&symbol);
        let mut pos = known.unwrap_or_default();
        if known.is_none() {
            self.index.track(&symbol);
            match self.fetch_and_cache(&symbol, pos).await {
                Ok(fetched) => pos = fetched,
                Err(e) => {
                    if let PxError::SymbolNotFound(_) = e {
                        self.index.forget(&symbol);
                        debug!("[client] {symbol}: unknown to the service");
                    }
                    return Err(e);
                }
            }
        } else if end > pos.end {
            pos = self.fetch_and_cache(&symbol, pos).await?;
        }

        let store = self.store.clone();
        run_blocking(move || store.read_window(&symbol, &pos, start, end)).await
    }

    /// Fetch everything past `pos.end` and append it. Returns the new position.
    ///
    /// Caller holds the symbol's write lock.
    async fn fetch_and_cache(
        &self,
        symbol: &str,
        pos: HistoryPosition,
    ) -> Result<HistoryPosition, PxError> {
        let query = [("start", pos.end.to_string()), ("format", "bin".to_string())];
        let body = self.http.get_bytes("history", symbol, &query).await?;
        let window = codec::decode_window(&body)?;
        check_window(symbol, &window)?;
        if window.is_empty() {
            return Ok(pos);
        }

        let (at, next) = if pos.records() == 0 {
            (0, HistoryPosition::new(window.start, window.end))
        } else if window.start == pos.end {
            (pos.records(), HistoryPosition::new(pos.start, window.end))
        } else if window.start > pos.end {
            warn!(
                "[client] {symbol}: service history restarts at {}, cache ended at {}",
                window.start, pos.end
            );
            self.index.reset(symbol);
            (0, HistoryPosition::new(window.start, window.end))
        } else {
            return Err(PxError::Parse(format!(
                "{symbol}: window starts at {} inside the cache ending at {}",
                window.start, pos.end
            )));
        };

        let store = self.store.clone();
        let owned = symbol.to_string();
        let candles = window.candles;
        let appended = candles.len();
        run_blocking(move || Ok(store.append(&owned, at, &candles)?)).await?;

        self.index.set(symbol, next)?;
        self.index.persist()?;
        info!("[client] {symbol}: cached {appended} candles, now up to {}", next.end);
        Ok(next)
    }
}

/// A window must cover whole buckets with exactly one record each.
fn check_window(symbol: &str, window: &HistoryWindow) -> Result<(), PxError> {
    let span = window.end - window.start;
    if span < 0 || span % BUCKET_MS != 0 || window.start % BUCKET_MS != 0 {
        return Err(PxError::Parse(format!(
            "{symbol}: misaligned window {}..{}",
            window.start, window.end
        )));
    }
    if window.candles.len() as i64 != span / BUCKET_MS {
        return Err(PxError::Parse(format!(
            "{symbol}: {} candles for {} buckets",
            window.candles.len(),
            span / BUCKET_MS
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeService, SYMBOL, T0};
    use px_core::Candle;

    fn prices(w: &HistoryWindow) -> Vec<f64> {
        w.candles.iter().map(|c| c.price).collect()
    }

    fn open(service: &FakeService, dir: &Path) -> LocalHistory {
        let config = service.config(dir);
        LocalHistory::open(dir, ServiceHttp::new(&config).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn first_request_caches_everything() {
        let service = FakeService::start(&[1.0, 2.0, 3.0, 4.0, 5.0]).await;
        let dir = tempfile::tempdir().unwrap();
        let history = open(&service, dir.path());

        let w = history.symbol_history("BTCUSD", T0, T0 + 2 * BUCKET_MS).await.unwrap();
        assert_eq!(prices(&w), vec![1.0, 2.0]);
        assert_eq!(history.position(SYMBOL), Some(HistoryPosition::new(T0, T0 + 5 * BUCKET_MS)));
        assert_eq!(history.store().record_count(SYMBOL).unwrap(), 5);

        let w = history
            .symbol_history(SYMBOL, T0 + BUCKET_MS, T0 + 4 * BUCKET_MS)
            .await
            .unwrap();
        assert_eq!(prices(&w), vec![2.0, 3.0, 4.0]);
        assert_eq!(service.history_calls(), 1);
    }

    #[tokio::test]
    async fn later_end_fetches_only_new_buckets() {
        let service = FakeService::start(&[1.0, 2.0, 3.0]).await;
        let dir = tempfile::tempdir().unwrap();
        let history = open(&service, dir.path());
        history.symbol_history(SYMBOL, T0, T0 + BUCKET_MS).await.unwrap();

        service.push(4.0);
        service.push(5.0);
        let w = history.symbol_history(SYMBOL, T0 + 2 * BUCKET_MS, i64::MAX).await.unwrap();
        assert_eq!(prices(&w), vec![3.0, 4.0, 5.0]);
        assert_eq!(service.last_history_start(), Some(T0 + 3 * BUCKET_MS));
        assert_eq!(history.store().record_count(SYMBOL).unwrap(), 5);

        // Nothing new upstream: the position stays put.
        let w = history.symbol_history(SYMBOL, T0, i64::MAX).await.unwrap();
        assert_eq!(w.candles.len(), 5);
        assert_eq!(service.history_calls(), 3);
    }

    #[tokio::test]
    async fn date_range_needs_no_request() {
        let service = FakeService::start(&[1.0]).await;
        let dir = tempfile::tempdir().unwrap();
        let history = open(&service, dir.path());

        let res = history.symbol_history(SYMBOL, T0, T0).await;
        assert!(matches!(res, Err(PxError::DateRange { .. })));
        assert_eq!(service.history_calls(), 0);
        assert_eq!(history.position(SYMBOL), None);
    }

    #[tokio::test]
    async fn unknown_symbol_is_forgotten() {
        let service = FakeService::start(&[1.0]).await;
        let dir = tempfile::tempdir().unwrap();
        let history = open(&service, dir.path());

        let res = history.symbol_history("nope", T0, T0 + BUCKET_MS).await;
        assert!(matches!(res, Err(PxError::SymbolNotFound(_))));
        assert_eq!(history.position("nope"), None);
        assert!(!history.store().symbol_path("nope").exists());
    }

    #[tokio::test]
    async fn cache_survives_reopen() {
        let service = FakeService::start(&[1.0, 2.0, 3.0]).await;
        let dir = tempfile::tempdir().unwrap();
        open(&service, dir.path())
            .symbol_history(SYMBOL, T0, T0 + BUCKET_MS)
            .await
            .unwrap();

        let history = open(&service, dir.path());
        assert_eq!(history.position(SYMBOL), Some(HistoryPosition::new(T0, T0 + 3 * BUCKET_MS)));
        let w = history.symbol_history(SYMBOL, T0, T0 + 3 * BUCKET_MS).await.unwrap();
        assert_eq!(prices(&w), vec![1.0, 2.0, 3.0]);
        assert_eq!(service.history_calls(), 1);
    }

    #[tokio::test]
    async fn relisted_series_starts_over() {
        let service = FakeService::start(&[1.0, 2.0, 3.0]).await;
        let dir = tempfile::tempdir().unwrap();
        let history = open(&service, dir.path());
        history.symbol_history(SYMBOL, T0, T0 + BUCKET_MS).await.unwrap();

        let relisted = T0 + 100 * BUCKET_MS;
        service.relist(relisted, &[Candle::new(7.0, 1.0), Candle::new(8.0, 1.0)]);
        let w = history.symbol_history(SYMBOL, T0, relisted + 2 * BUCKET_MS).await.unwrap();
        assert_eq!(prices(&w), vec![7.0, 8.0]);
        assert_eq!(
            history.position(SYMBOL),
            Some(HistoryPosition::new(relisted, relisted + 2 * BUCKET_MS))
        );

        let retired = std::fs::read_dir(history.store().dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".retired"))
            .count();
        assert_eq!(retired, 1);
    }

    #[test]
    fn window_shape_is_checked() {
        let ok = HistoryWindow {
            start: T0,
            end: T0 + 2 * BUCKET_MS,
            candles: vec![Candle::new(1.0, 1.0); 2],
        };
        assert!(check_window(SYMBOL, &ok).is_ok());

        let short = HistoryWindow { candles: vec![Candle::new(1.0, 1.0)], ..ok.clone() };
        assert!(matches!(check_window(SYMBOL, &short), Err(PxError::Parse(_))));
        let misaligned = HistoryWindow { start: T0 + 1, ..ok };
        assert!(matches!(check_window(SYMBOL, &misaligned), Err(PxError::Parse(_))));
    }
}
