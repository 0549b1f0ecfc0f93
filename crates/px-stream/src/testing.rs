//! Test doubles: an exchange whose ticks come from a local WebSocket server.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use px_core::time_util::now_ms;
use px_core::{Kline, OrderbookSnapshot, PriceTick, PxError, SymbolSet};
use px_exchange::Exchange;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

pub struct TickExchange {
    url: String,
    symbols: SymbolSet,
    orderbook_calls: AtomicUsize,
}

impl TickExchange {
    pub fn new(url: &str, symbols: &[&str]) -> Self {
        Self {
            url: url.to_string(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            orderbook_calls: AtomicUsize::new(0),
        }
    }

    pub fn orderbook_calls(&self) -> usize {
        self.orderbook_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Exchange for TickExchange {
    fn name(&self) -> &str {
        "ticks"
    }

    async fn klines(
        &self,
        _symbol: &str,
        _start_ms: i64,
        _limit: u32,
    ) -> Result<Vec<Kline>, PxError> {
        Ok(Vec::new())
    }

    async fn refresh_symbols(&self) -> Result<SymbolSet, PxError> {
        Ok(self.symbols.clone())
    }

    fn symbols(&self) -> SymbolSet {
        self.symbols.clone()
    }

    fn check_symbol(&self, symbol: &str) -> Result<(), PxError> {
        if self.symbols.contains(symbol) {
            Ok(())
        } else {
            Err(PxError::SymbolNotFound(symbol.to_string()))
        }
    }

    /// Every call returns a higher bid/ask than the last.
    async fn orderbook(&self, _symbol: &str) -> Result<OrderbookSnapshot, PxError> {
        let n = self.orderbook_calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(OrderbookSnapshot { buy: n as f64 + 0.5, sell: n as f64, captured_at_ms: now_ms() })
    }

    fn tick_stream_url(&self, symbol: &str) -> String {
        format!("{}/{symbol}", self.url)
    }

    /// Frames are bare decimal prices.
    fn parse_tick(&self, text: &str) -> Option<PriceTick> {
        text.parse::<f64>().ok()?;
        Some(PriceTick { price: text.to_string(), quantity: "1".into(), trade_time_ms: 0 })
    }
}

/// Serve one WebSocket session per entry of `sessions`, sending its frames
/// then closing. The last session is held open. Returns the base URL.
pub async fn tick_server(sessions: Vec<Vec<&'static str>>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let last = sessions.len().saturating_sub(1);
        for (i, frames) in sessions.into_iter().enumerate() {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            for f in frames {
                ws.send(Message::Text(f.to_string().into())).await.unwrap();
            }
            if i == last {
                while let Some(Ok(_)) = ws.next().await {}
            } else {
                ws.close(None).await.unwrap();
            }
        }
        // Keep accepting so late reconnects have somewhere to go.
        while let Ok((tcp, _)) = listener.accept().await {
            if let Ok(mut ws) = tokio_tungstenite::accept_async(tcp).await {
                while let Some(Ok(_)) = ws.next().await {}
            }
        }
    });

    format!("ws://{addr}")
}
