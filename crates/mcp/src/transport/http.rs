// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single `/mcp` HTTP endpoint. `Authorization: Bearer <token>` is
//! required whenever a token is configured; every JSON-RPC outcome
//! (including tool errors) rides back as HTTP 200, matching the
//! teacher's "protocol errors don't become transport errors" split
//! (`crates/daemon/src/protocol/wire.rs`) — only malformed bodies (400)
//! and missing/bad auth (401) are transport-level failures.

use crate::facade::Facade;
use crate::rpc::{RpcRequest, RpcResponse};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::post;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct HttpState {
    pub facade: Arc<Facade>,
    pub token: Option<String>,
}

pub fn router(state: HttpState) -> Router {
    Router::new().route("/mcp", post(handle_mcp)).layer(TraceLayer::new_for_http()).with_state(state)
}

async fn handle_mcp(
    State(state): State<HttpState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> axum::response::Response {
    if let Some(expected) = &state.token {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected.as_str()) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let req: RpcRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(RpcResponse::parse_error())).into_response(),
    };

    let response = super::handle_request(&state.facade, req).await;
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::Facade;
    use ctl_storage::registry::Registry;
    use ctl_storage::IndexStore;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn test_state(token: Option<&str>) -> HttpState {
        let index = Arc::new(IndexStore::open_in_memory().expect("index"));
        let dir = tempdir().expect("tempdir");
        let registry = Registry::at(dir.path().join("registry.json"));
        HttpState { facade: Arc::new(Facade::new(index, registry, 32_000)), token: token.map(str::to_string) }
    }

    #[tokio::test]
    async fn rejects_missing_bearer_token() {
        let state = test_state(Some("secret"));
        let response = handle_mcp(
            State(state),
            HeaderMap::new(),
            axum::body::Bytes::from(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn accepts_matching_bearer_token() {
        let state = test_state(Some("secret"));
        let mut headers = HeaderMap::new();
        headers.insert(axum::http::header::AUTHORIZATION, "Bearer secret".parse().expect("header value"));
        let response = handle_mcp(
            State(state),
            headers,
            axum::body::Bytes::from(r#"{"jsonrpc":"2.0","method":"ping","id":1}"#),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let state = test_state(None);
        let response = handle_mcp(State(state), HeaderMap::new(), axum::body::Bytes::from("not json")).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
