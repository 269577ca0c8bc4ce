// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! C6: MCP tool facade — JSON-RPC 2.0 over stdio or HTTP, wrapping the
//! control plane's storage and engine crates behind a fixed tool
//! catalogue.

pub mod facade;
pub mod rpc;
pub mod tools;
pub mod transport;

pub use facade::Facade;

use ctl_core::config::{McpConfig, Transport};
use ctl_core::error::Result;
use ctl_storage::registry::Registry;
use ctl_storage::IndexStore;
use std::sync::Arc;
use tracing::info;

/// Build the facade and run it on whichever transport `config` selects.
/// Blocks until the transport loop exits (stdin closed, or the HTTP
/// server is shut down).
pub async fn serve(config: McpConfig, index_path: &std::path::Path, registry_path: &std::path::Path) -> Result<()> {
    let index = Arc::new(IndexStore::open(index_path).map_err(|e| ctl_core::Error::fatal(e.to_string()))?);
    let registry = Registry::at(registry_path);
    let facade = Arc::new(Facade::new(index, registry, config.max_output_bytes));

    match config.transport {
        Transport::Stdio => {
            info!("serving MCP over stdio");
            transport::stdio::run(facade).await.map_err(|e| ctl_core::Error::fatal(e.to_string()))
        }
        Transport::Http => {
            let addr = format!("{}:{}", config.host, config.port);
            info!(%addr, "serving MCP over http");
            let state = transport::http::HttpState { facade, token: config.token.clone() };
            let router = transport::http::router(state);
            let listener = tokio::net::TcpListener::bind(&addr)
                .await
                .map_err(|e| ctl_core::Error::fatal(format!("binding {addr}: {e}")))?;
            axum::serve(listener, router).await.map_err(|e| ctl_core::Error::fatal(e.to_string()))
        }
    }
}
