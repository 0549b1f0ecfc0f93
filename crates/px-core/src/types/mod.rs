//! Core data types shared by the cache, the stream hubs and the server.
//!
//! Timestamps are milliseconds since the Unix epoch (`i64`) throughout.

pub mod candle;
pub mod history;
pub mod market;

pub use candle::*;
pub use history::*;
pub use market::*;
