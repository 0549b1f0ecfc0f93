//! Typed error definitions for the price cache service.
//!
//! [`PxError`] is the error returned by every library crate in the workspace.
//! The binary maps it onto HTTP status codes; the sync engine uses
//! [`PxError::is_transient`] to decide whether a symbol is simply retried on
//! the next pass.

use thiserror::Error;

/// Domain-specific errors for the price cache service.
#[derive(Debug, Error)]
pub enum PxError {
    /// The symbol is not (or no longer) tradable on the upstream exchange.
    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    /// The exchange answered, but with an error status (rate limit, bad page).
    #[error("exchange error: {0}")]
    Exchange(String),

    /// The exchange could not be reached (connect failure, timeout).
    #[error("upstream unavailable: {0}")]
    Upstream(String),

    /// Disk I/O on the candle store or position index failed.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Caller supplied `end <= start`.
    #[error("invalid date range: end {end} <= start {start}")]
    DateRange { start: i64, end: i64 },

    /// A position index update would break a watermark invariant.
    #[error("position index error: {0}")]
    Index(String),

    /// Upstream payload could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// WebSocket connection, handshake, or communication error.
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Configuration parsing or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// No exchange with this name is configured.
    #[error("unknown exchange: {0}")]
    UnknownExchange(String),
}

impl PxError {
    /// Errors that abort only the current sync pass of one symbol and are
    /// retried on the next scheduled pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Exchange(_) | Self::Upstream(_) | Self::Parse(_))
    }
}

impl From<serde_json::Error> for PxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}
