//! Newline-delimited JSON-RPC message codec
//!
//! Outbound frames are encoded as one compact JSON object followed by `\n`.
//! `serde_json` escapes control characters inside strings, so an encoded
//! frame never contains an embedded newline.
//!
//! Inbound lines are classified by [`decode_line`], which never fails: the
//! tool server's stdout may interleave banners and log output with protocol
//! frames, and anything that is not a well-formed response or notification
//! decodes as [`DecodedMessage::Unparseable`] so the caller can skip it.

use serde_json::Value;

use crate::error::Result;
use crate::mcp::types::{JsonRpcError, JsonRpcNotification, JsonRpcRequest};

/// JSON-RPC internal error code used when a peer sends a malformed error object.
const INTERNAL_ERROR: i64 = -32603;

/// A classified inbound line.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedMessage {
    /// A response to a client-originated request.
    Response {
        /// The request id the peer is answering.
        id: u64,
        /// `Ok(result)` on success, `Err(error)` for a JSON-RPC error payload.
        outcome: std::result::Result<Value, JsonRpcError>,
    },
    /// A server-sent notification.
    Notification {
        /// Notification method name.
        method: String,
        /// Notification params; `Value::Null` when absent.
        params: Value,
    },
    /// Malformed JSON, a non-protocol line, or a frame this client does not serve.
    Unparseable,
}

/// Encode a request as a single newline-terminated line.
///
/// `Value::Null` params are sent as an empty object so the frame always
/// carries a params mapping.
///
/// # Errors
///
/// Returns a serialization error if `params` cannot be encoded.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::codec::encode_request;
///
/// let line = encode_request(7, "tools/list", serde_json::json!({})).unwrap();
/// assert!(line.ends_with('\n'));
/// assert_eq!(line.matches('\n').count(), 1);
/// ```
pub fn encode_request(id: u64, method: &str, params: Value) -> Result<String> {
    let params = if params.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        params
    };
    let mut line = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
    line.push('\n');
    Ok(line)
}

/// Encode a notification (no `id`) as a single newline-terminated line.
///
/// # Errors
///
/// Returns a serialization error if `params` cannot be encoded.
pub fn encode_notification(method: &str, params: Option<Value>) -> Result<String> {
    let mut line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
    line.push('\n');
    Ok(line)
}

/// Classify one inbound line. Never fails.
///
/// # Examples
///
/// ```
/// use pgmcp_harness::mcp::codec::{decode_line, DecodedMessage};
///
/// assert_eq!(decode_line("Starting server..."), DecodedMessage::Unparseable);
/// match decode_line(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#) {
///     DecodedMessage::Response { id, outcome } => {
///         assert_eq!(id, 3);
///         assert!(outcome.is_ok());
///     }
///     other => panic!("unexpected: {other:?}"),
/// }
/// ```
pub fn decode_line(line: &str) -> DecodedMessage {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return DecodedMessage::Unparseable;
    }

    let value: Value = match serde_json::from_str(trimmed) {
        Ok(v) => v,
        Err(e) => {
            tracing::trace!("codec: non-JSON line skipped: {e}");
            return DecodedMessage::Unparseable;
        }
    };
    let Some(obj) = value.as_object() else {
        return DecodedMessage::Unparseable;
    };

    let id_val = obj.get("id").filter(|v| !v.is_null());
    let method = obj.get("method");
    let has_result = obj.contains_key("result");
    let has_error = obj.contains_key("error");

    match (id_val, method) {
        (Some(id_val), None) if has_result || has_error => {
            let Some(id) = parse_id(id_val) else {
                tracing::debug!("codec: response has non-integer id: {id_val}");
                return DecodedMessage::Unparseable;
            };
            let outcome = match obj.get("error") {
                Some(error_val) => Err(parse_error(error_val)),
                None => Ok(obj.get("result").cloned().unwrap_or(Value::Null)),
            };
            DecodedMessage::Response { id, outcome }
        }
        (None, Some(Value::String(method))) => DecodedMessage::Notification {
            method: method.clone(),
            params: obj.get("params").cloned().unwrap_or(Value::Null),
        },
        _ => {
            tracing::debug!(
                "codec: unclassifiable frame; has_id={} has_method={} has_result={has_result} has_error={has_error}",
                id_val.is_some(),
                method.is_some()
            );
            DecodedMessage::Unparseable
        }
    }
}

/// Accept integer ids and integer-valued strings.
fn parse_id(id_val: &Value) -> Option<u64> {
    id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
}

fn parse_error(error_val: &Value) -> JsonRpcError {
    serde_json::from_value::<JsonRpcError>(error_val.clone()).unwrap_or_else(|_| JsonRpcError {
        code: INTERNAL_ERROR,
        message: format!("malformed error object: {error_val}"),
        data: None,
    })
}
