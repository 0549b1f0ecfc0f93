//! Binance JSON payload parsers.
//!
//! Binance encodes decimal values as JSON strings (`"16500.50"`); they are
//! converted with `fast-float` for speed. Numbers are accepted as well.

use px_core::{Kline, PriceTick, PxError, SymbolSet};

// Column indices of a `/api/v3/klines` row.
const OPEN_TIME: usize = 0;
const OPEN: usize = 1;
const HIGH: usize = 2;
const LOW: usize = 3;
const CLOSE: usize = 4;
const VOLUME: usize = 5;

/// Binance error code for an unknown symbol.
pub const INVALID_SYMBOL_CODE: i64 = -1121;

/// Parse a JSON value (string or number) as `f64`.
#[inline]
fn parse_str_f64(v: Option<&serde_json::Value>) -> Option<f64> {
    let v = v?;
    if let Some(s) = v.as_str() {
        fast_float2::parse(s).ok()
    } else {
        v.as_f64()
    }
}

/// Parse a `/api/v3/klines` response body.
pub fn parse_klines(v: &serde_json::Value) -> Result<Vec<Kline>, PxError> {
    let rows = v
        .as_array()
        .ok_or_else(|| PxError::Parse("klines: expected array".into()))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| {
            let cols = row
                .as_array()
                .ok_or_else(|| PxError::Parse(format!("klines[{i}]: expected array")))?;
            let field = |idx: usize, name: &str| {
                parse_str_f64(cols.get(idx))
                    .ok_or_else(|| PxError::Parse(format!("klines[{i}]: bad {name}")))
            };
            let open_time = cols
                .get(OPEN_TIME)
                .and_then(|t| t.as_i64())
                .ok_or_else(|| PxError::Parse(format!("klines[{i}]: bad open time")))?;
            Ok(Kline {
                open_time,
                open: field(OPEN, "open")?,
                high: field(HIGH, "high")?,
                low: field(LOW, "low")?,
                close: field(CLOSE, "close")?,
                volume: field(VOLUME, "volume")?,
            })
        })
        .collect()
}

/// Extract the tradable spot symbols quoted in one of `quote_assets` from an
/// `/api/v3/exchangeInfo` response.
pub fn parse_exchange_info(info: &serde_json::Value, quote_assets: &[String]) -> SymbolSet {
    let Some(symbols) = info.get("symbols").and_then(|s| s.as_array()) else {
        return SymbolSet::new();
    };

    symbols
        .iter()
        .filter(|s| s.get("status").and_then(|v| v.as_str()) == Some("TRADING"))
        .filter(|s| s.get("isSpotTradingAllowed").and_then(|v| v.as_bool()) == Some(true))
        .filter(|s| {
            s.get("quoteAsset")
                .and_then(|v| v.as_str())
                .is_some_and(|q| quote_assets.iter().any(|want| want == q))
        })
        .filter_map(|s| s.get("symbol").and_then(|v| v.as_str()))
        .map(|s| s.to_lowercase())
        .collect()
}

/// Best bid and best ask from an `/api/v3/depth` response.
pub fn parse_depth_top(v: &serde_json::Value) -> Result<(f64, f64), PxError> {
    let top = |side: &str| {
        v.get(side)
            .and_then(|levels| levels.as_array())
            .and_then(|levels| levels.first())
            .and_then(|level| level.as_array())
            .and_then(|level| parse_str_f64(level.first()))
            .ok_or_else(|| PxError::Exchange(format!("depth: empty {side}")))
    };
    Ok((top("bids")?, top("asks")?))
}

/// Parse an `aggTrade` stream frame.
pub fn parse_agg_trade(text: &str) -> Option<PriceTick> {
    let v: serde_json::Value = serde_json::from_str(text).ok()?;
    if v.get("e")?.as_str()? != "aggTrade" {
        return None;
    }
    let price = v.get("p")?.as_str()?;
    // Reject frames whose price would not decode on the client side.
    fast_float2::parse::<f64, _>(price).ok()?;
    Some(PriceTick {
        price: price.to_string(),
        quantity: v.get("q").and_then(|q| q.as_str()).unwrap_or("0").to_string(),
        trade_time_ms: v.get("T").and_then(|t| t.as_i64()).unwrap_or(0),
    })
}

/// The `code` field of a Binance error body, if present.
pub fn error_code(body: &str) -> Option<i64> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    v.get("code")?.as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_kline_rows() {
        let body = serde_json::json!([
            [
                1499040000000i64, "0.01634790", "0.80000000", "0.01575800", "0.01577100",
                "148976.11427815", 1499644799999i64, "2434.19055334", 308, "1756.87402397",
                "28.46694368", "0"
            ],
            [1499040060000i64, "1.0", "3.0", "1.0", "2.0", "10", 0, "0", 0, "0", "0", "0"]
        ]);
        let klines = parse_klines(&body).unwrap();
        assert_eq!(klines.len(), 2);
        assert_eq!(klines[0].open_time, 1499040000000);
        assert!((klines[0].high - 0.8).abs() < 1e-12);
        assert!((klines[1].volume - 10.0).abs() < 1e-12);
        assert_eq!(px_core::Candle::from(&klines[1]).price, 2.0);
    }

    #[test]
    fn malformed_kline_row_is_parse_error() {
        let body = serde_json::json!([[1499040000000i64, "x", "y"]]);
        assert!(matches!(parse_klines(&body), Err(PxError::Parse(_))));
        assert!(matches!(parse_klines(&serde_json::json!({"code": 1})), Err(PxError::Parse(_))));
    }

    #[test]
    fn exchange_info_filters_by_status_and_quote() {
        let info = serde_json::json!({
            "symbols": [
                {"symbol": "BTCTRY", "status": "TRADING", "isSpotTradingAllowed": true, "quoteAsset": "TRY"},
                {"symbol": "ETHTRY", "status": "BREAK", "isSpotTradingAllowed": true, "quoteAsset": "TRY"},
                {"symbol": "ETHUSDT", "status": "TRADING", "isSpotTradingAllowed": true, "quoteAsset": "USDT"},
                {"symbol": "XRPTRY", "status": "TRADING", "isSpotTradingAllowed": false, "quoteAsset": "TRY"}
            ]
        });
        let set = parse_exchange_info(&info, &["TRY".to_string()]);
        assert_eq!(set.into_iter().collect::<Vec<_>>(), vec!["btctry".to_string()]);
    }

    #[test]
    fn depth_top_levels() {
        let body = serde_json::json!({
            "lastUpdateId": 1027024,
            "bids": [["4.00000000", "431.00000000"], ["3.9", "1"]],
            "asks": [["4.00000200", "12.00000000"]]
        });
        let (bid, ask) = parse_depth_top(&body).unwrap();
        assert_eq!(bid, 4.0);
        assert_eq!(ask, 4.000002);
        assert!(parse_depth_top(&serde_json::json!({"bids": [], "asks": []})).is_err());
    }

    #[test]
    fn agg_trade_frame() {
        let json = r#"{"e":"aggTrade","E":1672515782136,"s":"BTCUSDT","a":123456789,"p":"16500.50","q":"0.001","f":100,"l":105,"T":1672515782136,"m":true}"#;
        let tick = parse_agg_trade(json).unwrap();
        assert_eq!(tick.price, "16500.50");
        assert_eq!(tick.quantity, "0.001");
        assert_eq!(tick.trade_time_ms, 1672515782136);

        assert!(parse_agg_trade(r#"{"result":null,"id":1}"#).is_none());
        assert!(parse_agg_trade(r#"{"e":"aggTrade","p":"abc"}"#).is_none());
        assert!(parse_agg_trade("not json").is_none());
    }

    #[test]
    fn error_code_extraction() {
        let body = r#"{"code":-1121,"msg":"Invalid symbol."}"#;
        assert_eq!(error_code(body), Some(INVALID_SYMBOL_CODE));
        assert_eq!(error_code("<html>"), None);
    }
}
