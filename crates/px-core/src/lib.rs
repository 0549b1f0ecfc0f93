//! # px-core
//!
//! Core crate for the price cache service, providing:
//!
//! - **Types** (`types`): candles, history positions and windows, ticks, orderbook snapshots
//! - **Codec** (`codec`): fixed-width binary candle records
//! - **Configuration** (`config`): JSON config deserialization
//! - **Error types** (`error`): domain-specific `PxError` via thiserror
//! - **WebSocket** (`ws`): upstream WS client with supervised reconnect
//! - **Time utilities** (`time_util`): millisecond wall clock
//! - **Logging** (`logging`): tracing-based structured logging

pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod time_util;
pub mod types;
pub mod ws;

// Re-export types at crate root for convenience.
pub use error::PxError;
pub use types::*;
