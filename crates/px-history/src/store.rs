//! Append-only per-symbol candle files.
//!
//! A file holds fixed-width [`codec`] records back to back; record `i` is the
//! bucket at `position.start + i * BUCKET_MS`. The store never tracks file
//! length on its own: callers pass the record count from the position index,
//! and anything past it is an orphaned tail from an interrupted pass.
//!
//! A file left behind by a delisted symbol is never overwritten. When the
//! symbol starts over from record 0 the old file is renamed to
//! `{symbol}.{unix_ms}.retired` and a fresh one is created.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use px_core::codec::{self, RECORD_SIZE};
use px_core::time_util::now_ms;
use px_core::{BUCKET_MS, Candle, HistoryPosition, HistoryWindow, PxError};
use tracing::{info, warn};

/// Record range resolved from a position and a requested `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPlan {
    /// Nothing to read; the empty window is anchored at the timestamp.
    Empty(i64),
    Range {
        offset: u64,
        count: u64,
        start: i64,
        end: i64,
    },
}

/// Resolve which records of a file cover `[start, end)`.
///
/// `end == 0` means "up to the cached end". The effective start is clamped
/// to `pos.start` and rounded down to a bucket boundary; the effective end is
/// clamped to `pos.end` and only whole buckets are returned.
pub fn plan_window(pos: &HistoryPosition, start: i64, end: i64) -> WindowPlan {
    if start >= pos.end {
        return WindowPlan::Empty(pos.end);
    }
    if end != 0 && (end <= start || end <= pos.start) {
        return WindowPlan::Empty(pos.end);
    }

    let clamped = start.max(pos.start);
    let offset = ((clamped - pos.start) / BUCKET_MS) as u64;
    if offset >= pos.records() {
        return WindowPlan::Empty(pos.end);
    }
    let start = pos.start + offset as i64 * BUCKET_MS;
    let end = if end == 0 || end > pos.end { pos.end } else { end };
    let count = ((end - start) / BUCKET_MS) as u64;

    WindowPlan::Range {
        offset,
        count,
        start,
        end: start + count as i64 * BUCKET_MS,
    }
}

/// Windowed read of a candle file.
///
/// Pure with respect to locking; the caller holds the symbol's read lock.
pub fn read_window<R: Read + Seek>(
    reader: &mut R,
    pos: &HistoryPosition,
    start: i64,
    end: i64,
) -> io::Result<HistoryWindow> {
    match plan_window(pos, start, end) {
        WindowPlan::Empty(at) => Ok(HistoryWindow::empty_at(at)),
        WindowPlan::Range { offset, count, start, end } => {
            reader.seek(SeekFrom::Start(offset * RECORD_SIZE as u64))?;
            let candles = codec::read_candles(reader, count as usize)?;
            Ok(HistoryWindow { start, end, candles })
        }
    }
}

#[derive(Debug, Clone)]
pub struct CandleStore {
    dir: PathBuf,
}

impl CandleStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn symbol_path(&self, symbol: &str) -> PathBuf {
        self.dir.join(symbol)
    }

    /// Whole records currently on disk for `symbol`; a missing file is 0.
    pub fn record_count(&self, symbol: &str) -> io::Result<u64> {
        match fs::metadata(self.symbol_path(symbol)) {
            Ok(m) => Ok(m.len() / RECORD_SIZE as u64),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Record `i` of `symbol`, or `None` if the file is shorter.
    pub fn read_record(&self, symbol: &str, i: u64) -> io::Result<Option<Candle>> {
        let mut f = match File::open(self.symbol_path(symbol)) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        if f.metadata()?.len() < (i + 1) * RECORD_SIZE as u64 {
            return Ok(None);
        }
        f.seek(SeekFrom::Start(i * RECORD_SIZE as u64))?;
        Ok(codec::read_candles(&mut f, 1)?.pop())
    }

    /// Write `candles` starting at record `at`, the count the index holds.
    ///
    /// Bytes past `at` are discarded first, except at `at == 0` where a
    /// non-empty file is retired instead. A file shorter than `at` means the
    /// index claims data that is not on disk and is refused.
    pub fn append(&self, symbol: &str, at: u64, candles: &[Candle]) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        if at == 0 {
            self.retire(symbol)?;
        }
        let path = self.symbol_path(symbol);
        let mut f = OpenOptions::new().write(true).create(true).truncate(false).open(&path)?;

        let offset = at * RECORD_SIZE as u64;
        let len = f.metadata()?.len();
        if len < offset {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("{}: {len} bytes on disk, index expects {offset}", path.display()),
            ));
        }
        if len > offset {
            warn!("[store] {symbol}: dropping {} orphaned bytes", len - offset);
            f.set_len(offset)?;
        }

        f.seek(SeekFrom::Start(offset))?;
        codec::write_candles(&mut f, candles)?;
        f.sync_data()
    }

    /// Move a non-empty file of `symbol` aside. Returns its new path.
    pub fn retire(&self, symbol: &str) -> io::Result<Option<PathBuf>> {
        let path = self.symbol_path(symbol);
        match fs::metadata(&path) {
            Ok(m) if m.len() > 0 => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        let mut stamp = now_ms();
        let mut retired = self.dir.join(format!("{symbol}.{stamp}.retired"));
        while retired.exists() {
            stamp += 1;
            retired = self.dir.join(format!("{symbol}.{stamp}.retired"));
        }
        fs::rename(&path, &retired)?;
        info!("[store] {symbol}: retired old file to {}", retired.display());
        Ok(Some(retired))
    }

    /// Read the window `[start, end)` of `symbol` given its position.
    pub fn read_window(
        &self,
        symbol: &str,
        pos: &HistoryPosition,
        start: i64,
        end: i64,
    ) -> Result<HistoryWindow, PxError> {
        match plan_window(pos, start, end) {
            WindowPlan::Empty(at) => Ok(HistoryWindow::empty_at(at)),
            WindowPlan::Range { count: 0, start, .. } => Ok(HistoryWindow::empty_at(start)),
            WindowPlan::Range { .. } => {
                let mut f = File::open(self.symbol_path(symbol))?;
                Ok(read_window(&mut f, pos, start, end)?)
            }
        }
    }
}

/// Run blocking file work off the async executor.
pub async fn run_blocking<T, F>(f: F) -> Result<T, PxError>
where
    F: FnOnce() -> Result<T, PxError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| PxError::Storage(io::Error::other(e)))?
}
