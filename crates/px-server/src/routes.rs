//! HTTP and WebSocket routes.
//!
//! | Route                                   | Body |
//! |-----------------------------------------|------|
//! | `GET /{exchange}/history/{symbol}`      | `{start, end, prices, volumes}` or binary with `format=bin` |
//! | `GET /{exchange}/priceStream/{symbol}`  | WS upgrade; one JSON string per trade price |
//! | `GET /{exchange}/orderbookPrice/{symbol}` | `{buy, sell, capturedAt}` |

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Query, State, WebSocketUpgrade};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use px_core::codec;
use px_core::OrderbookSnapshot;
use px_stream::Subscription;
use serde::Deserialize;
use tokio::sync::watch;
use tracing::debug;

use crate::error::ApiError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/{exchange}/history/{symbol}", get(history))
        .route("/{exchange}/priceStream/{symbol}", get(price_stream))
        .route("/{exchange}/orderbookPrice/{symbol}", get(orderbook_price))
        .route("/health", get(health))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    #[serde(default)]
    pub start: i64,
    /// `0` reads up to the newest cached bucket.
    #[serde(default)]
    pub end: i64,
    /// `0` disables downsampling.
    #[serde(default)]
    pub max_size: usize,
    pub format: Option<String>,
}

async fn history(
    State(state): State<AppState>,
    Path((exchange, symbol)): Path<(String, String)>,
    Query(q): Query<HistoryQuery>,
) -> Result<Response, ApiError> {
    let ex = state.exchange(&exchange)?;
    let window = ex
        .history
        .get_symbol_history(&symbol.to_lowercase(), q.start, q.end)
        .await?
        .downsampled(q.max_size);

    if q.format.as_deref() == Some("bin") {
        let headers = [(header::CONTENT_TYPE, "application/octet-stream")];
        return Ok((headers, codec::encode_window(&window)).into_response());
    }
    Ok(Json(window.to_response()).into_response())
}

async fn price_stream(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let ex = state.exchange(&exchange)?;
    let sub = ex.hubs.subscribe(&symbol.to_lowercase())?;
    let shutdown = state.shutdown();
    Ok(ws.on_upgrade(move |socket| relay_ticks(socket, sub, shutdown)))
}

/// Forward hub ticks to one client until either side goes away.
async fn relay_ticks(
    socket: WebSocket,
    mut sub: Subscription,
    mut shutdown: watch::Receiver<bool>,
) {
    let (mut sender, mut receiver) = socket.split();
    let id = sub.id();
    debug!("[stream] {id} connected");

    loop {
        tokio::select! {
            tick = sub.recv() => {
                let Some(tick) = tick else { break };
                let Ok(body) = serde_json::to_string(&tick.price) else { continue };
                if sender.send(Message::Text(body.into())).await.is_err() {
                    break;
                }
            }
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                _ => {}
            },
            _ = shutdown.changed() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    sub.unsubscribe();
    debug!("[stream] {id} disconnected");
}

async fn orderbook_price(
    State(state): State<AppState>,
    Path((exchange, symbol)): Path<(String, String)>,
) -> Result<Json<OrderbookSnapshot>, ApiError> {
    let ex = state.exchange(&exchange)?;
    Ok(Json(ex.orderbooks.get(&symbol.to_lowercase()).await?))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
