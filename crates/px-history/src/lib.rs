//! # px-history
//!
//! Durable minute-candle cache with incremental synchronization.
//!
//! - **Position index** (`index`): per-symbol `{start, end}` watermarks in one JSON document
//! - **Candle store** (`store`): append-only fixed-width record files with windowed reads
//! - **Sync engine** (`sync`): paginated upstream fetches under per-symbol locks, pooled passes
//! - **Exchange history** (`history`): the above wired together behind `get_symbol_history`;
//!   `open_cache_dir` is shared with the service's client-side cache
//!
//! ## Layout
//!
//! ```text
//! {data_dir}/{exchange}/symbols.json
//! {data_dir}/{exchange}/prices/{symbol}
//! ```

pub mod history;
pub mod index;
pub mod store;
pub mod sync;

#[cfg(test)]
mod testing;

pub use history::{ExchangeHistory, open_cache_dir};
pub use index::{LoadOutcome, PositionIndex};
pub use store::CandleStore;
pub use sync::{PassSummary, SyncConfig, SyncEngine, SyncReport};
