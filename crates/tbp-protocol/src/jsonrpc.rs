// SPDX-License-Identifier: MIT OR Apache-2.0
//! JSON-RPC 2.0 envelopes and the newline-delimited codec.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol version string carried in every envelope.
pub const JSONRPC_VERSION: &str = "2.0";

/// Parse error (malformed JSON on the wire).
pub const PARSE_ERROR: i64 = -32700;
/// The request object is not a valid JSON-RPC request.
pub const INVALID_REQUEST: i64 = -32600;
/// The method does not exist.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Internal server or transport error.
pub const INTERNAL_ERROR: i64 = -32603;

/// A JSON-RPC 2.0 request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Request id; echoed verbatim in the response.  Absent on
    /// notifications.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Method name (`initialize`, `tools/list`, `tools/call`, …).
    pub method: String,
    /// Method parameters.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    /// New request with the given id.
    pub fn new(id: Value, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    /// Error code (standard codes above, or an HTTP status passed through).
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Optional structured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// The request id this answers (`null` when unknowable, e.g. parse
    /// errors).
    pub id: Value,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error object on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// Successful response echoing `id`.
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response echoing `id`.
    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Encoder/decoder for newline-delimited JSON envelopes.
pub struct JsonlCodec;

/// Errors from [`JsonlCodec`].
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The line is not valid JSON of the expected shape.
    #[error("decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

impl JsonlCodec {
    /// Serialize to a single newline-terminated line.
    pub fn encode<T: Serialize>(value: &T) -> Result<String, CodecError> {
        let mut line = serde_json::to_string(value)?;
        line.push('\n');
        Ok(line)
    }

    /// Parse one (trimmed) line.
    pub fn decode<T: for<'de> Deserialize<'de>>(line: &str) -> Result<T, CodecError> {
        Ok(serde_json::from_str(line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip_preserves_id() {
        let req = JsonRpcRequest::new(json!(42), "tools/call", Some(json!({"name": "manage_task"})));
        let line = JsonlCodec::encode(&req).unwrap();
        assert!(line.ends_with('\n'));
        let back: JsonRpcRequest = JsonlCodec::decode(line.trim()).unwrap();
        assert_eq!(back.id, Some(json!(42)));
        assert_eq!(back.method, "tools/call");
    }

    #[test]
    fn string_ids_are_echoed_verbatim() {
        let resp = JsonRpcResponse::success(json!("req-7"), json!({"ok": true}));
        let encoded = serde_json::to_value(&resp).unwrap();
        assert_eq!(encoded["id"], json!("req-7"));
        assert_eq!(encoded["jsonrpc"], json!("2.0"));
    }

    #[test]
    fn error_response_shape() {
        let resp = JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error");
        let encoded = serde_json::to_value(&resp).unwrap();
        assert_eq!(encoded["error"]["code"], json!(-32700));
        assert!(encoded.get("result").is_none());
        assert_eq!(encoded["id"], Value::Null);
    }

    #[test]
    fn decode_rejects_garbage() {
        let result: Result<JsonRpcRequest, _> = JsonlCodec::decode("{not json");
        assert!(result.is_err());
    }

    #[test]
    fn notification_has_no_id() {
        let req: JsonRpcRequest =
            JsonlCodec::decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
                .unwrap();
        assert!(req.id.is_none());
    }
}
