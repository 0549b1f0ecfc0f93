//! Per-exchange history cache: index, candle files and sync engine behind
//! the one query the HTTP layer needs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use px_core::time_util::now_ms;
use px_core::{BUCKET_MS, HistoryPosition, HistoryWindow, PxError};
use px_exchange::Exchange;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::index::{LoadOutcome, PositionIndex};
use crate::store::{CandleStore, run_blocking};
use crate::sync::{SymbolChanges, SyncConfig, SyncEngine};

const INDEX_FILE: &str = "symbols.json";
const PRICES_DIR: &str = "prices";

pub struct ExchangeHistory {
    root: PathBuf,
    exchange: Arc<dyn Exchange>,
    index: Arc<PositionIndex>,
    store: CandleStore,
    engine: SyncEngine,
}

impl ExchangeHistory {
    /// Open (or create) the cache of `exchange` under `data_dir/<name>/`.
    pub fn open(
        data_dir: &Path,
        exchange: Arc<dyn Exchange>,
        config: SyncConfig,
    ) -> Result<Self, PxError> {
        let root = data_dir.join(exchange.name());
        let (index, store) = open_cache_dir(&root)?;

        let index = Arc::new(index);
        let engine =
            SyncEngine::new(Arc::clone(&exchange), Arc::clone(&index), store.clone(), config);
        Ok(Self { root, exchange, index, store, engine })
    }

    pub fn name(&self) -> &str {
        self.exchange.name()
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index(&self) -> &PositionIndex {
        &self.index
    }

    pub fn store(&self) -> &CandleStore {
        &self.store
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub fn position(&self, symbol: &str) -> Option<HistoryPosition> {
        self.index.get(symbol)
    }

    pub async fn refresh_symbols(&self) -> Result<SymbolChanges, PxError> {
        self.engine.refresh_symbols().await
    }

    /// Start the recurring sync job.
    pub fn spawn_sync_job(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        self.engine.clone().spawn(shutdown)
    }

    /// Cached candles of `symbol` in `[start, end)`; `end == 0` is open-ended.
    ///
    /// When the cache does not reach `end` (or `now - rollback margin` for an
    /// open end) the symbol is synced first. A tradable symbol the last
    /// refresh did not know yet starts being tracked here.
    pub async fn get_symbol_history(
        &self,
        symbol: &str,
        start: i64,
        end: i64,
    ) -> Result<HistoryWindow, PxError> {
        if end != 0 && end <= start {
            return Err(PxError::DateRange { start, end });
        }
        self.exchange.check_symbol(symbol)?;
        if self.index.track(symbol) {
            debug!("[history] {symbol}: tracked on demand");
        }

        let wanted = if end == 0 {
            now_ms() - self.engine.config().rollback_margin_ms
        } else {
            end
        };
        if !self.index.covers(symbol, wanted) {
            let report = self.engine.sync_symbol(symbol).await?;
            if let Some(e) = report.fetch_error {
                return Err(e);
            }
        }

        let lock = self.index.symbol_lock(symbol);
        let _guard = lock.read().await;
        let pos = self.index.get(symbol).unwrap_or_default();
        let store = self.store.clone();
        let symbol = symbol.to_string();
        run_blocking(move || store.read_window(&symbol, &pos, start, end)).await
    }
}

/// Load (or create) the position index and candle files under `root`.
///
/// An unreadable index invalidates every cached file. A readable one is
/// reconciled against the files so no position claims more records than
/// are on disk.
pub fn open_cache_dir(root: &Path) -> Result<(PositionIndex, CandleStore), PxError> {
    let prices = root.join(PRICES_DIR);

    let (index, outcome) = PositionIndex::load(root.join(INDEX_FILE));
    if outcome == LoadOutcome::Rebuilt {
        match fs::remove_dir_all(&prices) {
            Ok(()) => warn!("[history] {}: discarded cached candle files", root.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    fs::create_dir_all(&prices)?;

    let store = CandleStore::new(prices);
    let clamped = reconcile(&index, &store)?;
    if clamped > 0 || outcome == LoadOutcome::Rebuilt {
        index.persist()?;
    }
    info!(
        "[history] opened {} ({} symbols, {clamped} clamped)",
        root.display(),
        index.len()
    );
    Ok((index, store))
}

/// Lower every position that claims more records than its file holds.
fn reconcile(index: &PositionIndex, store: &CandleStore) -> Result<usize, PxError> {
    let mut clamped = 0;
    for symbol in index.symbols() {
        let Some(pos) = index.get(&symbol) else {
            continue;
        };
        let on_disk = store.record_count(&symbol)?;
        if pos.records() <= on_disk && pos.is_aligned() {
            continue;
        }

        let kept = pos.records().min(on_disk);
        let fixed = if kept == 0 {
            HistoryPosition::default()
        } else {
            HistoryPosition::new(pos.start, pos.start + kept as i64 * BUCKET_MS)
        };
        warn!("[history] {symbol}: index {pos:?} ahead of {on_disk} records, now {fixed:?}");
        index.clamp(&symbol, fixed);
        clamped += 1;
    }
    Ok(clamped)
}
