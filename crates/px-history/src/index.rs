//! Per-symbol history watermarks, persisted as one JSON document.
//!
//! The index is the single source of truth for how many candle records a
//! symbol's file holds. All map mutations go through one index-wide mutex;
//! in addition every symbol owns a [`tokio::sync::RwLock`] that serializes
//! fetch/append passes against windowed reads of that symbol's file.
//!
//! On disk:
//!
//! ```json
//! {"btctry": {"start": 1598804580000, "end": 1599409380000}, "ethtry": {"start": 0, "end": 0}}
//! ```

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use ahash::AHashMap;
use px_core::{HistoryPosition, PxError, SymbolSet};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Per-symbol read/write lock guarding the symbol's candle file.
pub type SymbolLock = Arc<RwLock<()>>;

/// How [`PositionIndex::load`] obtained its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The document was read; holds the number of symbols.
    Loaded(usize),
    /// The document was missing or unreadable; the index starts empty and the
    /// cached candle files must be discarded.
    Rebuilt,
}

pub struct PositionIndex {
    path: PathBuf,
    positions: Mutex<BTreeMap<String, HistoryPosition>>,
    locks: Mutex<AHashMap<String, SymbolLock>>,
}

impl PositionIndex {
    /// An empty index that persists to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            positions: Mutex::new(BTreeMap::new()),
            locks: Mutex::new(AHashMap::new()),
        }
    }

    /// Load the index document at `path`.
    ///
    /// A missing or corrupt document never fails the load: partial state is
    /// not trusted, so the index comes back empty with [`LoadOutcome::Rebuilt`].
    pub fn load(path: impl Into<PathBuf>) -> (Self, LoadOutcome) {
        let index = Self::empty(path);
        let outcome = match read_document(&index.path) {
            Ok(map) => {
                let n = map.len();
                *index.positions() = map;
                LoadOutcome::Loaded(n)
            }
            Err(e) => {
                warn!("[index] {} unusable ({e}), rebuilding from empty", index.path.display());
                LoadOutcome::Rebuilt
            }
        };
        (index, outcome)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, symbol: &str) -> Option<HistoryPosition> {
        self.positions().get(symbol).copied()
    }

    /// `true` if the cached range of `symbol` reaches at least `ts`.
    pub fn covers(&self, symbol: &str, ts: i64) -> bool {
        self.get(symbol).is_some_and(|p| p.records() > 0 && p.end >= ts)
    }

    /// Record a new watermark for `symbol`.
    ///
    /// The symbol must be tracked: a symbol dropped by a refresh while its
    /// pass was in flight fails with [`PxError::SymbolNotFound`] instead of
    /// coming back. Rejects updates that would move an established `start`,
    /// move `end` backwards, or leave a partial bucket.
    pub fn set(&self, symbol: &str, pos: HistoryPosition) -> Result<(), PxError> {
        if pos.end < pos.start || !pos.is_aligned() {
            return Err(PxError::Index(format!("{symbol}: malformed position {pos:?}")));
        }

        let mut positions = self.positions();
        let Some(old) = positions.get_mut(symbol) else {
            return Err(PxError::SymbolNotFound(symbol.to_string()));
        };
        if old.records() > 0 {
            if pos.start != old.start {
                return Err(PxError::Index(format!(
                    "{symbol}: start is immutable ({} -> {})",
                    old.start, pos.start
                )));
            }
            if pos.end < old.end {
                return Err(PxError::Index(format!(
                    "{symbol}: end regressed ({} -> {})",
                    old.end, pos.end
                )));
            }
        }
        *old = pos;
        Ok(())
    }

    /// Start tracking `symbol` with an empty position. `false` if it already
    /// was tracked.
    pub fn track(&self, symbol: &str) -> bool {
        let mut positions = self.positions();
        if positions.contains_key(symbol) {
            return false;
        }
        positions.insert(symbol.to_string(), HistoryPosition::default());
        true
    }

    /// Stop tracking `symbol` and drop its lock. The candle file is kept.
    pub fn forget(&self, symbol: &str) -> Option<HistoryPosition> {
        let removed = self.positions().remove(symbol);
        self.locks().remove(symbol);
        removed
    }

    /// Empty the position of a tracked `symbol` so its series can start
    /// over at a new `start`. The lock is kept. `false` if not tracked.
    pub fn reset(&self, symbol: &str) -> bool {
        match self.positions().get_mut(symbol) {
            Some(pos) => {
                *pos = HistoryPosition::default();
                true
            }
            None => false,
        }
    }

    /// Lower a watermark to what is actually on disk. Only used when
    /// reconciling with the candle files at startup.
    pub(crate) fn clamp(&self, symbol: &str, pos: HistoryPosition) {
        self.positions().insert(symbol.to_string(), pos);
    }

    /// Tracked symbols, sorted.
    pub fn symbols(&self) -> Vec<String> {
        self.positions().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.positions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions().is_empty()
    }

    /// Drop symbols no longer in `current` and their locks. Their candle
    /// files stay on disk. Returns the removed symbols.
    pub fn remove_stale(&self, current: &SymbolSet) -> Vec<String> {
        let removed: Vec<String> = {
            let mut positions = self.positions();
            let stale: Vec<String> =
                positions.keys().filter(|s| !current.contains(*s)).cloned().collect();
            for s in &stale {
                positions.remove(s);
            }
            stale
        };

        let mut locks = self.locks();
        for s in &removed {
            locks.remove(s);
        }
        removed
    }

    /// Start tracking symbols of `current` that are not indexed yet, with an
    /// empty position. Returns the added symbols.
    pub fn add_missing(&self, current: &SymbolSet) -> Vec<String> {
        let mut positions = self.positions();
        let mut added = Vec::new();
        for s in current {
            if !positions.contains_key(s) {
                positions.insert(s.clone(), HistoryPosition::default());
                added.push(s.clone());
            }
        }
        added
    }

    /// The read/write lock of `symbol`, created on first use.
    pub fn symbol_lock(&self, symbol: &str) -> SymbolLock {
        Arc::clone(self.locks().entry(symbol.to_string()).or_default())
    }

    /// Write the full index to disk.
    ///
    /// The document is written to a sibling temp file, flushed, then renamed
    /// over the old one, all under the index mutex, so a crash leaves either
    /// the old or the new document.
    pub fn persist(&self) -> Result<(), PxError> {
        let positions = self.positions();
        let bytes = serde_json::to_vec(&*positions)?;

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut f = File::create(&tmp)?;
            f.write_all(&bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!("[index] persisted {} positions", positions.len());
        Ok(())
    }

    fn positions(&self) -> MutexGuard<'_, BTreeMap<String, HistoryPosition>> {
        self.positions.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn locks(&self) -> MutexGuard<'_, AHashMap<String, SymbolLock>> {
        self.locks.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn read_document(path: &Path) -> Result<BTreeMap<String, HistoryPosition>, PxError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use px_core::BUCKET_MS;

    fn set_of(symbols: &[&str]) -> SymbolSet {
        symbols.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn missing_document_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let (index, outcome) = PositionIndex::load(dir.path().join("symbols.json"));
        assert_eq!(outcome, LoadOutcome::Rebuilt);
        assert!(index.is_empty());
    }

    #[test]
    fn corrupt_document_rebuilds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.json");
        fs::write(&path, br#"{"btctry": {"start": 1, "#).unwrap();
        let (index, outcome) = PositionIndex::load(&path);
        assert_eq!(outcome, LoadOutcome::Rebuilt);
        assert!(index.is_empty());
    }

    #[test]
    fn persist_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("symbols.json");

        let index = PositionIndex::empty(&path);
        index.add_missing(&set_of(&["ethusd", "btcusd"]));
        index.set("ethusd", HistoryPosition::new(1_000_000, 1_300_000)).unwrap();
        index.persist().unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let (loaded, outcome) = PositionIndex::load(&path);
        assert_eq!(outcome, LoadOutcome::Loaded(2));
        assert_eq!(loaded.get("ethusd"), Some(HistoryPosition::new(1_000_000, 1_300_000)));
        assert_eq!(loaded.get("btcusd"), Some(HistoryPosition::default()));
    }

    #[test]
    fn start_is_immutable_and_end_monotonic() {
        let index = PositionIndex::empty("unused.json");
        assert!(index.track("ethusd"));
        index.set("ethusd", HistoryPosition::new(0, 0)).unwrap();
        index.set("ethusd", HistoryPosition::new(1_000_000, 1_060_000)).unwrap();
        index.set("ethusd", HistoryPosition::new(1_000_000, 1_180_000)).unwrap();

        let moved = index.set("ethusd", HistoryPosition::new(940_000, 1_180_000));
        assert!(matches!(moved, Err(PxError::Index(_))));
        let regressed = index.set("ethusd", HistoryPosition::new(1_000_000, 1_060_000));
        assert!(matches!(regressed, Err(PxError::Index(_))));
        let partial =
            index.set("ethusd", HistoryPosition::new(1_000_000, 1_180_000 + BUCKET_MS / 2));
        assert!(matches!(partial, Err(PxError::Index(_))));

        assert_eq!(index.get("ethusd"), Some(HistoryPosition::new(1_000_000, 1_180_000)));
    }

    #[test]
    fn symbol_set_refresh() {
        let index = PositionIndex::empty("unused.json");
        index.add_missing(&set_of(&["old", "kept"]));
        index.set("old", HistoryPosition::new(0, BUCKET_MS)).unwrap();
        index.set("kept", HistoryPosition::new(0, BUCKET_MS)).unwrap();
        let old_lock = index.symbol_lock("old");

        let current = set_of(&["kept", "new"]);
        assert_eq!(index.remove_stale(&current), vec!["old".to_string()]);
        assert_eq!(index.add_missing(&current), vec!["new".to_string()]);

        assert_eq!(index.symbols(), vec!["kept".to_string(), "new".to_string()]);
        assert_eq!(index.get("kept"), Some(HistoryPosition::new(0, BUCKET_MS)));
        assert_eq!(index.get("new"), Some(HistoryPosition::default()));
        // A fresh lock is handed out after removal.
        assert!(!Arc::ptr_eq(&old_lock, &index.symbol_lock("old")));
    }

    #[test]
    fn symbol_lock_is_shared() {
        let index = PositionIndex::empty("unused.json");
        assert!(Arc::ptr_eq(&index.symbol_lock("a"), &index.symbol_lock("a")));
        assert!(!Arc::ptr_eq(&index.symbol_lock("a"), &index.symbol_lock("b")));
    }

    #[test]
    fn covers_requires_data() {
        let index = PositionIndex::empty("unused.json");
        index.track("a");
        assert!(!index.covers("a", 0));
        index.set("a", HistoryPosition::new(60_000, 180_000)).unwrap();
        assert!(index.covers("a", 180_000));
        assert!(!index.covers("a", 180_001));
        assert!(!index.covers("missing", 0));
    }

    #[test]
    fn set_requires_tracked_symbol() {
        let index = PositionIndex::empty("unused.json");
        let pos = HistoryPosition::new(0, BUCKET_MS);
        assert!(matches!(index.set("ghost", pos), Err(PxError::SymbolNotFound(_))));
        assert_eq!(index.get("ghost"), None);

        assert!(index.track("ghost"));
        assert!(!index.track("ghost"));
        index.set("ghost", pos).unwrap();

        // Dropped mid-pass: the late update must not resurrect it.
        index.remove_stale(&set_of(&[]));
        let late = index.set("ghost", HistoryPosition::new(0, 2 * BUCKET_MS));
        assert!(matches!(late, Err(PxError::SymbolNotFound(_))));
        assert!(index.is_empty());
    }

    #[test]
    fn forget_drops_position_and_lock() {
        let index = PositionIndex::empty("unused.json");
        index.track("a");
        let lock = index.symbol_lock("a");
        assert_eq!(index.forget("a"), Some(HistoryPosition::default()));
        assert_eq!(index.forget("a"), None);
        assert!(!Arc::ptr_eq(&lock, &index.symbol_lock("a")));
    }

    #[test]
    fn reset_allows_a_new_start() {
        let index = PositionIndex::empty("unused.json");
        assert!(!index.reset("a"));
        index.track("a");
        index.set("a", HistoryPosition::new(0, 3 * BUCKET_MS)).unwrap();
        let lock = index.symbol_lock("a");

        assert!(index.reset("a"));
        index.set("a", HistoryPosition::new(10 * BUCKET_MS, 12 * BUCKET_MS)).unwrap();
        assert_eq!(index.get("a").unwrap().start, 10 * BUCKET_MS);
        assert!(Arc::ptr_eq(&lock, &index.symbol_lock("a")));
    }
}
