// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON-RPC 2.0 envelope types and the error code taxonomy.
//!
//! Shaped after the teacher's `protocol` module (request/response envelope,
//! `ProtocolError` mapped to wire errors) but the wire format here is plain
//! JSON-RPC 2.0, not the teacher's length-prefixed framing — see
//! `examples/original_source/mcp/server.py`'s dispatch loop, which this
//! follows directly.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32000;

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
    #[serde(default)]
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: Option<Value>,
}

impl RpcResponse {
    pub fn ok(id: Option<Value>, result: Value) -> Self {
        Self { jsonrpc: "2.0", result: Some(result), error: None, id }
    }

    pub fn err(id: Option<Value>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message: message.into(), data: None }),
            id,
        }
    }

    pub fn parse_error() -> Self {
        Self::err(None, PARSE_ERROR, "parse error")
    }
}

/// A tool's own soft failure: surfaced as a successful JSON-RPC response
/// whose result carries `isError: true`, matching the MCP tool-call
/// convention (a failed tool call is not a protocol-level error).
pub fn tool_error_result(message: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{ "type": "text", "text": message.into() }],
        "isError": true,
    })
}

pub fn tool_text_result(text: String) -> Value {
    serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    })
}

/// Map a `ctl_core::Error` onto the JSON-RPC code taxonomy SPEC_FULL §7
/// specifies: validation errors are caller mistakes (`-32602`), everything
/// else is an internal failure (`-32000`).
pub fn code_for_error(error: &ctl_core::Error) -> i64 {
    match error {
        ctl_core::Error::Validation(_) => INVALID_PARAMS,
        _ => INTERNAL_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_response_omits_error_field() {
        let resp = RpcResponse::ok(Some(Value::from(1)), serde_json::json!({"a": 1}));
        let encoded = serde_json::to_value(&resp).expect("serialize");
        assert!(encoded.get("error").is_none());
    }

    #[test]
    fn err_response_omits_result_field() {
        let resp = RpcResponse::err(None, METHOD_NOT_FOUND, "nope");
        let encoded = serde_json::to_value(&resp).expect("serialize");
        assert!(encoded.get("result").is_none());
        assert_eq!(encoded["error"]["code"], METHOD_NOT_FOUND);
    }

    #[test]
    fn tool_error_result_sets_is_error_true() {
        let value = tool_error_result("boom");
        assert_eq!(value["isError"], true);
    }
}
