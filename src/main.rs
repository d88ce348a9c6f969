//! MCP tool host.
//!
//! Serves `get_weather`, `calculate` and `convert_currency` over SSE
//! (default, `http://127.0.0.1:8000/sse`) or stdio (`--transport stdio`).

use mimalloc::MiMalloc;

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use std::sync::Arc;

use anyhow::Context;
use dotenvy::dotenv;
use tokio_util::sync::CancellationToken;
use tracing::info;

use mcp_tool_loop::config::{AppConfig, TransportKind};
use mcp_tool_loop::logging::init_tracing;
use mcp_tool_loop::server::{Dispatcher, serve_sse, serve_stdio};
use mcp_tool_loop::tools::ToolRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    // Initialize tracing (M-LOG-STRUCTURED); stderr only
    init_tracing("info");

    let config = AppConfig::load().context("failed to load configuration")?;

    let registry = Arc::new(ToolRegistry::with_default_tools());
    for tool in registry.descriptors() {
        info!(name: "mcp.tool.registered", tool = %tool.name, "MCP tool registered");
    }
    let dispatcher = Arc::new(Dispatcher::new(registry, config.server.name.clone()));

    match config.server.transport {
        TransportKind::Stdio => serve_stdio(dispatcher)
            .await
            .context("stdio server failed")?,
        TransportKind::Sse => {
            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    trigger.cancel();
                }
            });
            serve_sse(dispatcher, &config.server.bind_addr(), shutdown)
                .await
                .context("SSE server failed")?;
        }
    }

    Ok(())
}
