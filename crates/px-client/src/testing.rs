//! In-process stand-in for the price service.

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path as UrlPath, Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use px_core::{BUCKET_MS, Candle, HistoryPosition, OrderbookSnapshot, codec};
use px_history::store::read_window;
use serde::Deserialize;

use crate::config::ClientConfig;

/// The only symbol the fake service knows.
pub const SYMBOL: &str = "btcusd";

/// First bucket of the fake series.
pub const T0: i64 = 1_700_000_040_000;

#[derive(Default)]
struct Shared {
    series: Mutex<(i64, Vec<Candle>)>,
    history_calls: AtomicUsize,
    last_start: Mutex<Option<i64>>,
    orderbook_calls: AtomicUsize,
    stream_sessions: AtomicUsize,
}

pub struct FakeService {
    addr: SocketAddr,
    shared: Arc<Shared>,
}

impl FakeService {
    /// Serve a series of `prices` starting at [`T0`] on a random port.
    pub async fn start(prices: &[f64]) -> Self {
        let candles = prices.iter().map(|&p| Candle::new(p, 1.0)).collect();
        let shared = Arc::new(Shared::default());
        *shared.series.lock().unwrap() = (T0, candles);

        let app = Router::new()
            .route("/{exchange}/history/{symbol}", get(history))
            .route("/{exchange}/orderbookPrice/{symbol}", get(orderbook_price))
            .route("/{exchange}/priceStream/{symbol}", get(price_stream))
            .route("/{exchange}/broken/{symbol}", get(|| async { StatusCode::SERVICE_UNAVAILABLE }))
            .with_state(Arc::clone(&shared));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, shared }
    }

    pub fn config(&self, cache_dir: &Path) -> ClientConfig {
        ClientConfig {
            host: self.addr.to_string(),
            cache_dir: cache_dir.to_path_buf(),
            reconnect_backoff_ms: 20,
            ..ClientConfig::default()
        }
    }

    /// Add one bucket to the end of the series.
    pub fn push(&self, price: f64) {
        self.shared.series.lock().unwrap().1.push(Candle::new(price, 1.0));
    }

    /// Replace the series with one starting at `start`.
    pub fn relist(&self, start: i64, candles: &[Candle]) {
        *self.shared.series.lock().unwrap() = (start, candles.to_vec());
    }

    pub fn history_calls(&self) -> usize {
        self.shared.history_calls.load(Ordering::SeqCst)
    }

    pub fn last_history_start(&self) -> Option<i64> {
        *self.shared.last_start.lock().unwrap()
    }

    pub fn orderbook_calls(&self) -> usize {
        self.shared.orderbook_calls.load(Ordering::SeqCst)
    }

    pub fn stream_sessions(&self) -> usize {
        self.shared.stream_sessions.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    start: i64,
    #[serde(default)]
    end: i64,
    format: Option<String>,
}

async fn history(
    State(shared): State<Arc<Shared>>,
    UrlPath((_, symbol)): UrlPath<(String, String)>,
    Query(q): Query<HistoryQuery>,
) -> Response {
    if symbol != SYMBOL {
        return StatusCode::NOT_FOUND.into_response();
    }
    if q.format.as_deref() != Some("bin") {
        return StatusCode::BAD_REQUEST.into_response();
    }
    shared.history_calls.fetch_add(1, Ordering::SeqCst);
    *shared.last_start.lock().unwrap() = Some(q.start);

    let (start, candles) = shared.series.lock().unwrap().clone();
    let pos = HistoryPosition::new(start, start + candles.len() as i64 * BUCKET_MS);
    let mut file = Cursor::new(codec::encode_all(&candles));
    match read_window(&mut file, &pos, q.start, q.end) {
        Ok(window) => codec::encode_window(&window).into_response(),
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn orderbook_price(
    State(shared): State<Arc<Shared>>,
    UrlPath((_, symbol)): UrlPath<(String, String)>,
) -> Response {
    if symbol != SYMBOL {
        return StatusCode::NOT_FOUND.into_response();
    }
    shared.orderbook_calls.fetch_add(1, Ordering::SeqCst);
    Json(OrderbookSnapshot { buy: 11.0, sell: 9.0, captured_at_ms: T0 }).into_response()
}

async fn price_stream(
    ws: WebSocketUpgrade,
    State(shared): State<Arc<Shared>>,
    UrlPath((_, symbol)): UrlPath<(String, String)>,
) -> Response {
    if symbol != SYMBOL {
        return StatusCode::NOT_FOUND.into_response();
    }
    let session = shared.stream_sessions.fetch_add(1, Ordering::SeqCst);
    ws.on_upgrade(move |socket| stream_session(socket, session))
}

/// The first session sends two prices around an unreadable frame and hangs
/// up. Later sessions send one price and stay open.
async fn stream_session(mut socket: WebSocket, session: usize) {
    let frames: &[&str] = if session == 0 { &["1.5", "bad", "2.5"] } else { &["3.5"] };
    for frame in frames {
        let body = serde_json::to_string(frame).unwrap();
        if socket.send(Message::Text(body.into())).await.is_err() {
            return;
        }
    }
    if session == 0 {
        let _ = socket.send(Message::Close(None)).await;
        return;
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Close(_) = msg {
            break;
        }
    }
}
