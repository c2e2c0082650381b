//! # Value Codec
//!
//! Converts native column values to and from the JSON tokens stored inside
//! `updated_values`. The scheme must survive `json_patch` merging, which
//! treats a bare JSON `null` as "remove this key" — indistinguishable from
//! "key unchanged". NULL and BLOB therefore get tagged marker objects:
//!
//! | Native value | JSON token |
//! |--------------|------------|
//! | non-null, non-blob scalar | native JSON equivalent |
//! | NULL | `{"null": 1}` |
//! | BLOB | `{"hex": "<uppercase hex>"}` |
//!
//! Encoding is bijective over representable values, including empty strings,
//! zero, negative numbers, and empty blobs: `decode(encode(v)) == v`.
//!
//! The two marker shapes are reserved. A column whose legitimate value is a
//! JSON object shaped exactly like a marker cannot be told apart from an
//! encoded NULL/blob; that ambiguity is deliberately left unresolved rather
//! than special-cased. Any other object shape fails with [`Error::Decode`],
//! never a silent coercion.

use serde_json::{json, Value as JsonValue};

use crate::error::{Error, Result};
use crate::types::SqlValue;

/// Tag of the NULL marker object: `{"null": 1}`.
pub const NULL_MARKER_TAG: &str = "null";

/// Tag of the blob marker object: `{"hex": "DEADBEEF"}`.
pub const HEX_MARKER_TAG: &str = "hex";

// =============================================================================
// Encoding
// =============================================================================

/// Encodes a native column value into its JSON token.
pub fn encode(value: &SqlValue) -> JsonValue {
    match value {
        SqlValue::Null => json!({ "null": 1 }),
        SqlValue::Integer(i) => json!(i),
        // SQLite itself stores non-finite reals as NULL; mirror that here
        // since JSON has no representation for them.
        SqlValue::Real(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| json!({ "null": 1 })),
        SqlValue::Text(s) => JsonValue::String(s.clone()),
        SqlValue::Blob(bytes) => json!({ "hex": hex::encode_upper(bytes) }),
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Decodes a JSON token back into a native column value.
///
/// # Errors
///
/// [`Error::Decode`] for marker objects with an unrecognized tag, malformed
/// hex payloads, and JSON shapes the encoder never produces (arrays,
/// booleans).
pub fn decode(token: &JsonValue) -> Result<SqlValue> {
    match token {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(SqlValue::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(SqlValue::Real(f))
            } else {
                Err(Error::Decode(format!("number out of range: {n}")))
            }
        }
        JsonValue::String(s) => Ok(SqlValue::Text(s.clone())),
        JsonValue::Object(map) => {
            if map.len() == 1 {
                if map.contains_key(NULL_MARKER_TAG) {
                    return Ok(SqlValue::Null);
                }
                if let Some(payload) = map.get(HEX_MARKER_TAG) {
                    let hex_str = payload.as_str().ok_or_else(|| {
                        Error::Decode(format!("hex marker payload is not a string: {payload}"))
                    })?;
                    let bytes = hex::decode(hex_str)
                        .map_err(|e| Error::Decode(format!("invalid hex payload: {e}")))?;
                    return Ok(SqlValue::Blob(bytes));
                }
            }
            Err(Error::Decode(format!(
                "unrecognized marker object: {}",
                JsonValue::Object(map.clone())
            )))
        }
        JsonValue::Bool(_) | JsonValue::Array(_) => {
            Err(Error::Decode(format!("unsupported JSON token: {token}")))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
