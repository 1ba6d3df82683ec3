use crate::error::StoreError;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chrono::{DateTime, Utc};
use vc_core::time::{format_ts, parse_ts};

/// Encode a `(ts, id)` pagination boundary as URL-safe base64 of
/// `"<canonical-ts>|<id>"`.
pub fn encode_cursor(ts: &DateTime<Utc>, id: i64) -> String {
    let text = format!("{}|{}", format_ts(ts), id);
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

/// Decode a cursor. URL-safe base64 is preferred; padded standard base64 is
/// accepted for backward compatibility with older clients.
pub fn decode_cursor(cursor: &str) -> Result<(DateTime<Utc>, i64), StoreError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .or_else(|_| STANDARD.decode(cursor))
        .map_err(|_| StoreError::InvalidCursor {
            reason: "base64 decode failed",
        })?;

    let text = String::from_utf8(bytes).map_err(|_| StoreError::InvalidCursor {
        reason: "not utf-8",
    })?;

    let (ts_text, id_text) = text.split_once('|').ok_or(StoreError::InvalidCursor {
        reason: "missing separator",
    })?;

    let ts = parse_ts(ts_text).map_err(|_| StoreError::InvalidCursor {
        reason: "invalid timestamp",
    })?;

    let id = id_text.parse::<i64>().map_err(|_| StoreError::InvalidCursor {
        reason: "invalid id",
    })?;

    Ok((ts, id))
}
