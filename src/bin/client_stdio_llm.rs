//! Spawns the tool host as a subprocess and asks the model a question that
//! needs two tools.

use mimalloc::MiMalloc;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

use anyhow::Context;
use dotenvy::dotenv;

use mcp_tool_loop::client::{CLOSING_LINE, run_llm_query};
use mcp_tool_loop::config::{AppConfig, load_llm_settings};
use mcp_tool_loop::logging::init_tracing;
use mcp_tool_loop::mcp::transport::StdioTransport;

const QUERY: &str = "What is 90 multiplied by 68.6.\n Also tell the weather in Lucknow.\n Use MCP tools for both.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv();
    init_tracing("warn");

    let config = AppConfig::load().context("failed to load configuration")?;
    let settings = load_llm_settings(&config.timeouts).map_err(anyhow::Error::msg)?;
    let transport = StdioTransport::new(
        config.client.resolve_server_command(),
        config.client.server_args.clone(),
    )
    // The child logs to our stderr; keep it quiet unless asked.
    .with_env("RUST_LOG", std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()));

    run_llm_query(&transport, &config, settings, QUERY).await?;
    println!("{CLOSING_LINE}");
    Ok(())
}
