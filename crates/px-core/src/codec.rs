//! Fixed-width binary encoding of [`Candle`] records.
//!
//! Each record is 16 bytes: `price` then `volume`, both IEEE-754 `f64` in
//! little-endian byte order. The layout is independent of the in-memory
//! representation of `Candle`, so files written on one platform read back
//! identically on any other.
//!
//! A history window travels over HTTP as `start:i64 LE | end:i64 LE`
//! followed by its records ([`encode_window`] / [`decode_window`]).

use std::io::{self, Read, Write};

use crate::error::PxError;
use crate::types::{Candle, HistoryWindow};

/// Size of one encoded candle record in bytes.
pub const RECORD_SIZE: usize = 16;

/// Encode one candle into a fixed-size buffer.
#[inline]
pub fn encode(candle: &Candle) -> [u8; RECORD_SIZE] {
    let mut buf = [0u8; RECORD_SIZE];
    buf[..8].copy_from_slice(&candle.price.to_le_bytes());
    buf[8..].copy_from_slice(&candle.volume.to_le_bytes());
    buf
}

/// Decode one candle from a fixed-size buffer.
#[inline]
pub fn decode(buf: &[u8; RECORD_SIZE]) -> Candle {
    let mut price = [0u8; 8];
    let mut volume = [0u8; 8];
    price.copy_from_slice(&buf[..8]);
    volume.copy_from_slice(&buf[8..]);
    Candle {
        price: f64::from_le_bytes(price),
        volume: f64::from_le_bytes(volume),
    }
}

/// Encode a batch of candles into one contiguous buffer.
pub fn encode_all(candles: &[Candle]) -> Vec<u8> {
    let mut out = Vec::with_capacity(candles.len() * RECORD_SIZE);
    for c in candles {
        out.extend_from_slice(&encode(c));
    }
    out
}

/// Write a batch of candles to `w`.
pub fn write_candles<W: Write>(w: &mut W, candles: &[Candle]) -> io::Result<()> {
    w.write_all(&encode_all(candles))
}

/// Read exactly `count` records from `r`.
///
/// Fails with `UnexpectedEof` if fewer bytes are available.
pub fn read_candles<R: Read>(r: &mut R, count: usize) -> io::Result<Vec<Candle>> {
    let mut bytes = vec![0u8; count * RECORD_SIZE];
    r.read_exact(&mut bytes)?;
    Ok(decode_all(&bytes))
}

/// Decode every whole record in `bytes`; a trailing partial record is ignored.
pub fn decode_all(bytes: &[u8]) -> Vec<Candle> {
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|chunk| {
            let mut buf = [0u8; RECORD_SIZE];
            buf.copy_from_slice(chunk);
            decode(&buf)
        })
        .collect()
}

/// Size of the `start | end` header of an encoded window.
pub const WINDOW_HEADER_SIZE: usize = 16;

/// Encode a window as header plus records.
pub fn encode_window(window: &HistoryWindow) -> Vec<u8> {
    let mut out = Vec::with_capacity(WINDOW_HEADER_SIZE + window.candles.len() * RECORD_SIZE);
    out.extend_from_slice(&window.start.to_le_bytes());
    out.extend_from_slice(&window.end.to_le_bytes());
    out.extend_from_slice(&encode_all(&window.candles));
    out
}

/// Decode a window produced by [`encode_window`].
///
/// The body must hold the header and whole records only.
pub fn decode_window(bytes: &[u8]) -> Result<HistoryWindow, PxError> {
    if bytes.len() < WINDOW_HEADER_SIZE || (bytes.len() - WINDOW_HEADER_SIZE) % RECORD_SIZE != 0 {
        return Err(PxError::Parse(format!("history body of {} bytes", bytes.len())));
    }
    let mut start = [0u8; 8];
    let mut end = [0u8; 8];
    start.copy_from_slice(&bytes[..8]);
    end.copy_from_slice(&bytes[8..WINDOW_HEADER_SIZE]);
    Ok(HistoryWindow {
        start: i64::from_le_bytes(start),
        end: i64::from_le_bytes(end),
        candles: decode_all(&bytes[WINDOW_HEADER_SIZE..]),
    })
}
