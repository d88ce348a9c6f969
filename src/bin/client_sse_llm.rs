//! Asks the model a multiplication question over the SSE transport, with
//! every tool call approved at the terminal.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anyhow::Context;
use dotenvy::dotenv;

use mcp_tool_loop::client::{CLOSING_LINE, run_llm_query};
use mcp_tool_loop::config::{AppConfig, load_llm_settings};
use mcp_tool_loop::logging::init_tracing;
use mcp_tool_loop::mcp::transport::SseTransport;

const QUERY: &str = "What is 90 multiplied by 68.6? Use MCP tools if available.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    init_tracing("warn");

    let config = AppConfig::load().context("failed to load configuration")?;
    let settings = load_llm_settings(&config.timeouts).map_err(anyhow::Error::msg)?;
    let transport = SseTransport::new(&config.client.sse_url, config.timeouts.connect())?;

    run_llm_query(&transport, &config, settings, QUERY).await?;
    println!("{CLOSING_LINE}");
    Ok(())
}
