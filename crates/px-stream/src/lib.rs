//! # px-stream
//!
//! Live market data fan-out for the price cache service.
//!
//! - [`hub`]: one upstream trade stream per symbol, delivered to many
//!   subscribers through bounded, drop-on-full queues
//! - [`registry`]: lazily created hubs keyed by symbol
//! - [`orderbook`]: short-TTL best bid/ask snapshots

pub mod hub;
pub mod orderbook;
pub mod registry;

#[cfg(test)]
mod testing;

pub use hub::{BroadcastHub, Subscription, TickDecoder};
pub use orderbook::OrderbookCache;
pub use registry::HubRegistry;
