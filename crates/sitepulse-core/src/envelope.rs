//! Collector wire envelope.
//!
//! Fresh snapshots are JSON-encoded, wrapped once more as JSON, base64
//! encoded, then wrapped a final time as the request body:
//!
//! ```text
//! J = JSON(snapshot)
//! E = base64(JSON({"data": J}))
//! body = {"data": E}
//! ```
//!
//! Replayed queue entries already hold `E` and are sent as `{"data": E}`
//! with no re-wrapping. The collector depends on this exact shape; do not
//! normalize it.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde_json::json;

use crate::error::{Error, Result};
use crate::payload::Snapshot;

/// Encode a snapshot into the persisted/transmitted form `E`.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<String> {
    let inner = serde_json::to_string(snapshot)?;
    let wrapped = serde_json::to_string(&json!({ "data": inner }))?;
    Ok(STANDARD.encode(wrapped))
}

/// Build the request body `{"data": E}` around an encoded payload.
///
/// Used identically for fresh sends and replays; the asymmetry lives in how
/// `E` was produced, not here.
pub fn request_body(encoded: &str) -> String {
    json!({ "data": encoded }).to_string()
}

/// Decode an encoded payload `E` back into a snapshot.
pub fn decode_snapshot(encoded: &str) -> Result<Snapshot> {
    let wrapped = STANDARD
        .decode(encoded)
        .map_err(|e| Error::Transport(format!("invalid base64 envelope: {e}")))?;
    let outer: serde_json::Value = serde_json::from_slice(&wrapped)?;
    let inner = outer
        .get("data")
        .and_then(serde_json::Value::as_str)
        .ok_or_else(|| Error::Transport("envelope missing data field".to_string()))?;
    Ok(serde_json::from_str(inner)?)
}
