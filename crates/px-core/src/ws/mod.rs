//! WebSocket client with supervised reconnection.

pub mod client;

pub use client::{ConnState, OnMessageCallback, WsConnConfig, WsConnection};
