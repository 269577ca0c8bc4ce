// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dual transport: stdio (newline-delimited JSON-RPC) and HTTP
//! (single `/mcp` endpoint, bearer auth). Both funnel into the same
//! `dispatch::handle_request`.

pub mod http;
pub mod stdio;

use crate::facade::Facade;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::tools;
use serde_json::Value;
use std::sync::Arc;

/// Handle one decoded JSON-RPC request against the shared facade,
/// covering the four always-present methods plus `tools/call` dispatch.
pub async fn handle_request(facade: &Arc<Facade>, req: RpcRequest) -> RpcResponse {
    let id = req.id.clone();
    match req.method.as_str() {
        "initialize" => RpcResponse::ok(
            id,
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": { "tools": {} },
                "serverInfo": { "name": "ctl-mcp", "version": env!("CARGO_PKG_VERSION") },
            }),
        ),
        "notifications/initialized" => RpcResponse::ok(id, Value::Null),
        "ping" => RpcResponse::ok(id, serde_json::json!({})),
        "tools/list" => RpcResponse::ok(id, tools::list_tools_result()),
        "tools/call" => {
            let Some(name) = req.params.get("name").and_then(|v| v.as_str()) else {
                return RpcResponse::err(id, crate::rpc::INVALID_PARAMS, "tools/call requires a name");
            };
            let params = req.params.get("arguments").cloned().unwrap_or(Value::Null);
            match facade.call(name, params).await {
                Ok(result) => RpcResponse::ok(id, result),
                Err((code, message)) => RpcResponse::err(id, code, message),
            }
        }
        other => RpcResponse::err(id, crate::rpc::METHOD_NOT_FOUND, format!("unknown method: {other}")),
    }
}
