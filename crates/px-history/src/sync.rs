//! Incremental history synchronization.
//!
//! Each symbol advances independently: under its write lock the engine pages
//! the upstream kline API forward from the cached `end`, stops short of the
//! roll-back margin so still-open buckets are never stored, then appends the
//! accumulated candles and persists the new watermark.
//!
//! A recurring job drives full passes over the symbol set through a fixed
//! pool of workers pulling from a shared queue.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use ahash::AHashSet;
use px_core::config::ExchangeConfig;
use px_core::time_util::now_ms;
use px_core::{BUCKET_MS, Candle, HistoryPosition, Kline, PxError, align_to_bucket};
use px_exchange::Exchange;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, trace, warn};

use crate::index::PositionIndex;
use crate::store::{CandleStore, run_blocking};

/// Tunables of one exchange's sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Buckets opening later than `now - rollback_margin_ms` are left for the next pass.
    pub rollback_margin_ms: i64,
    pub page_size: u32,
    pub workers: usize,
    pub interval: Duration,
    pub symbol_refresh: Duration,
    /// Earliest timestamp requested for a symbol with no cached data.
    pub history_floor_ms: i64,
}

impl SyncConfig {
    pub fn from_exchange(cfg: &ExchangeConfig) -> Self {
        Self {
            rollback_margin_ms: cfg.effective_rollback_margin_ms(),
            page_size: cfg.effective_page_size(),
            workers: cfg.effective_sync_workers(),
            interval: cfg.effective_sync_interval(),
            symbol_refresh: cfg.effective_symbol_refresh(),
            history_floor_ms: cfg.effective_history_floor_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from_exchange(&ExchangeConfig::default())
    }
}

/// Stage of one symbol's pass. Only used for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    Locked,
    Fetching,
    Appending,
}

/// Outcome of one symbol's pass.
#[derive(Debug, Default)]
pub struct SyncReport {
    pub pages: u32,
    /// Records written, gap fillers included.
    pub appended: u64,
    pub position: HistoryPosition,
    /// The upstream error that cut the pass short. Whatever was fetched
    /// before it has been stored.
    pub fetch_error: Option<PxError>,
}

/// Totals of one pass over the whole symbol set.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassSummary {
    pub synced: usize,
    pub appended: u64,
    pub failed: usize,
    pub delisted: usize,
}

impl PassSummary {
    fn merge(&mut self, other: PassSummary) {
        self.synced += other.synced;
        self.appended += other.appended;
        self.failed += other.failed;
        self.delisted += other.delisted;
    }
}

/// Symbol set changes applied by [`SyncEngine::refresh_symbols`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SymbolChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Clone)]
pub struct SyncEngine {
    exchange: Arc<dyn Exchange>,
    index: Arc<PositionIndex>,
    store: CandleStore,
    config: SyncConfig,
    /// Symbols the exchange reported unknown; skipped until the next refresh.
    delisted: Arc<Mutex<AHashSet<String>>>,
}

impl SyncEngine {
    pub fn new(
        exchange: Arc<dyn Exchange>,
        index: Arc<PositionIndex>,
        store: CandleStore,
        config: SyncConfig,
    ) -> Self {
        Self {
            exchange,
            index,
            store,
            config,
            delisted: Arc::new(Mutex::new(AHashSet::new())),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn is_delisted(&self, symbol: &str) -> bool {
        self.delisted().contains(symbol)
    }

    /// Bring `symbol` up to `now - rollback_margin`.
    pub async fn sync_symbol(&self, symbol: &str) -> Result<SyncReport, PxError> {
        self.sync_symbol_at(symbol, now_ms(), None).await
    }

    /// One pass for `symbol` with an explicit clock.
    ///
    /// Upstream failures end the pass and are returned in
    /// [`SyncReport::fetch_error`] after the partial progress is stored;
    /// storage and index failures are returned as `Err`, as is a symbol the
    /// index does not track.
    pub async fn sync_symbol_at(
        &self,
        symbol: &str,
        now: i64,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> Result<SyncReport, PxError> {
        if self.is_delisted(symbol) {
            return Err(PxError::SymbolNotFound(symbol.to_string()));
        }

        let lock = self.index.symbol_lock(symbol);
        let _guard = lock.write().await;
        phase(symbol, SyncPhase::Locked);

        let Some(base) = self.index.get(symbol) else {
            return Err(PxError::SymbolNotFound(symbol.to_string()));
        };
        let carry = self.last_price(symbol, base).await?;
        let mut pos = base;
        let mut batch: Vec<Candle> = Vec::new();
        let mut report = SyncReport::default();
        let safe_now = now - self.config.rollback_margin_ms;

        phase(symbol, SyncPhase::Fetching);
        while pos.end <= safe_now {
            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!("[sync] {symbol}: interrupted by shutdown");
                break;
            }

            let from = if pos.records() == 0 {
                pos.end.max(self.config.history_floor_ms)
            } else {
                pos.end
            };
            match self.exchange.klines(symbol, from, self.config.page_size).await {
                Ok(page) => {
                    report.pages += 1;
                    if absorb_page(&mut pos, &mut batch, &page, safe_now, carry) == 0 {
                        break;
                    }
                }
                Err(e) => {
                    if matches!(e, PxError::SymbolNotFound(_)) {
                        self.delisted().insert(symbol.to_string());
                    }
                    report.fetch_error = Some(e);
                    break;
                }
            }
        }

        if !batch.is_empty() {
            phase(symbol, SyncPhase::Appending);
            report.appended = batch.len() as u64;

            let store = self.store.clone();
            let name = symbol.to_string();
            let at = base.records();
            run_blocking(move || Ok(store.append(&name, at, &batch)?)).await?;

            match self.index.set(symbol, pos) {
                Ok(()) => self.index.persist()?,
                // Removed by a refresh during the pass; the file is left as is.
                Err(PxError::SymbolNotFound(_)) => {
                    debug!("[sync] {symbol}: no longer tracked, watermark dropped");
                }
                Err(e) => return Err(e),
            }
        }

        report.position = pos;
        phase(symbol, SyncPhase::Idle);
        Ok(report)
    }

    /// Price of the newest stored bucket, carried into leading gaps.
    async fn last_price(&self, symbol: &str, pos: HistoryPosition) -> Result<Option<f64>, PxError> {
        if pos.records() == 0 {
            return Ok(None);
        }
        let store = self.store.clone();
        let name = symbol.to_string();
        let last = run_blocking(move || Ok(store.read_record(&name, pos.records() - 1)?)).await?;
        Ok(last.map(|c| c.price))
    }

    /// Sync every tracked symbol once through the worker pool.
    pub async fn run_pass(&self, shutdown: watch::Receiver<bool>) -> PassSummary {
        let symbols = self.index.symbols();
        if symbols.is_empty() {
            return PassSummary::default();
        }

        let (tx, rx) = mpsc::channel(symbols.len());
        for s in symbols {
            let _ = tx.try_send(s);
        }
        drop(tx);
        let queue = Arc::new(tokio::sync::Mutex::new(rx));

        let mut workers = JoinSet::new();
        for _ in 0..self.config.workers.max(1) {
            let engine = self.clone();
            let queue = Arc::clone(&queue);
            let shutdown = shutdown.clone();
            workers.spawn(async move {
                let mut summary = PassSummary::default();
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    let Some(symbol) = queue.lock().await.recv().await else {
                        break;
                    };
                    engine.record(&symbol, &mut summary, &shutdown).await;
                }
                summary
            });
        }

        let mut total = PassSummary::default();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(summary) => total.merge(summary),
                Err(e) => error!("[sync] worker panicked: {e}"),
            }
        }
        total
    }

    async fn record(
        &self,
        symbol: &str,
        summary: &mut PassSummary,
        shutdown: &watch::Receiver<bool>,
    ) {
        if self.is_delisted(symbol) {
            return;
        }
        match self.sync_symbol_at(symbol, now_ms(), Some(shutdown)).await {
            Ok(report) => {
                summary.appended += report.appended;
                match report.fetch_error {
                    None => summary.synced += 1,
                    Some(PxError::SymbolNotFound(_)) => {
                        warn!("[sync] {symbol}: unknown upstream, skipped until symbol refresh");
                        summary.delisted += 1;
                    }
                    Some(e) if e.is_transient() => {
                        let n = report.appended;
                        warn!("[sync] {symbol}: failed after {n} records, retry next pass: {e}");
                        summary.failed += 1;
                    }
                    Some(e) => {
                        let n = report.appended;
                        error!("[sync] {symbol}: fetch failed after {n} records: {e}");
                        summary.failed += 1;
                    }
                }
            }
            Err(e) => {
                error!("[sync] {symbol}: {e}");
                summary.failed += 1;
            }
        }
    }

    /// Pull the tradable symbol set and reconcile the index with it.
    pub async fn refresh_symbols(&self) -> Result<SymbolChanges, PxError> {
        let current = self.exchange.refresh_symbols().await?;
        let changes = SymbolChanges {
            removed: self.index.remove_stale(&current),
            added: self.index.add_missing(&current),
        };
        self.delisted().clear();
        self.index.persist()?;

        info!(
            "[sync] {}: {} symbols (+{} -{})",
            self.exchange.name(),
            current.len(),
            changes.added.len(),
            changes.removed.len()
        );
        Ok(changes)
    }

    /// Spawn the recurring job: refresh symbols when due, run a pass, sleep.
    /// Ends when `shutdown` flips to `true`, after in-flight appends finish.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last_refresh = tokio::time::Instant::now();
            loop {
                if last_refresh.elapsed() >= self.config.symbol_refresh {
                    match self.refresh_symbols().await {
                        Ok(_) => last_refresh = tokio::time::Instant::now(),
                        Err(e) => warn!("[sync] symbol refresh failed: {e}"),
                    }
                }

                let started = tokio::time::Instant::now();
                let summary = self.run_pass(shutdown.clone()).await;
                info!(
                    "[sync] {}: pass done in {:?}: synced={} appended={} failed={} delisted={}",
                    self.exchange.name(),
                    started.elapsed(),
                    summary.synced,
                    summary.appended,
                    summary.failed,
                    summary.delisted
                );

                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("[sync] {}: job stopped", self.exchange.name());
        })
    }

    fn delisted(&self) -> std::sync::MutexGuard<'_, AHashSet<String>> {
        self.delisted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn phase(symbol: &str, p: SyncPhase) {
    trace!("[sync] {symbol}: {p:?}");
}

/// Fold one page of klines into `batch`, advancing `pos.end`.
///
/// Buckets already covered are skipped, missing buckets are filled with the
/// previous price (`carry` before the first batched candle) and zero volume,
/// and buckets opening after `safe_now` stop the page. The first bucket of an
/// empty position fixes its `start`. Returns the number of records added.
fn absorb_page(
    pos: &mut HistoryPosition,
    batch: &mut Vec<Candle>,
    page: &[Kline],
    safe_now: i64,
    carry: Option<f64>,
) -> usize {
    let before = batch.len();
    for k in page {
        let open = align_to_bucket(k.open_time);
        if open > safe_now {
            break;
        }
        if pos.records() == 0 && batch.is_empty() {
            *pos = HistoryPosition::new(open, open);
        }
        if open < pos.end {
            continue;
        }

        let filler = batch.last().map(|c| c.price).or(carry).unwrap_or(k.open);
        while pos.end < open {
            batch.push(Candle::new(filler, 0.0));
            pos.end += BUCKET_MS;
        }
        batch.push(Candle::from(k));
        pos.end += BUCKET_MS;
    }
    batch.len() - before
}
