//! Connects to the SSE tool host, lists its tools and calls
//! `calculate("2 + 3")` directly, without a model in the loop.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anyhow::Context;
use dotenvy::dotenv;
use serde_json::json;

use mcp_tool_loop::client::CLOSING_LINE;
use mcp_tool_loop::config::AppConfig;
use mcp_tool_loop::logging::init_tracing;
use mcp_tool_loop::mcp::McpSession;
use mcp_tool_loop::mcp::transport::SseTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    init_tracing("warn");

    let config = AppConfig::load().context("failed to load configuration")?;
    let transport = SseTransport::new(&config.client.sse_url, config.timeouts.connect())?;
    let session = McpSession::connect(&transport, config.timeouts.request())
        .await
        .with_context(|| format!("failed to connect to {}", config.client.sse_url))?;

    let result = async {
        let tools = session.list_tools().await?;
        println!("Available tools:");
        for tool in &tools {
            println!("  • {}: {}", tool.name, tool.description);
        }

        let result = session
            .call_tool("calculate", json!({ "expression": "2 + 3" }))
            .await?;
        println!("2 + 3 = {}", result.first_text());
        anyhow::Ok(())
    }
    .await;

    session.close().await;
    result?;
    println!("{CLOSING_LINE}");
    Ok(())
}
