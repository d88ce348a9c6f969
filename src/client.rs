//! Shared driver for the console clients.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::approval::TerminalApproval;
use crate::config::AppConfig;
use crate::llm::{ChatCompletionsClient, ConsoleEvents, LlmSettings, NegotiationOptions, Negotiator};
use crate::mcp::McpSession;
use crate::mcp::transport::Transport;

/// Printed after the session has been released.
pub const CLOSING_LINE: &str = "Connection terminated successfully!";

/// Connect through `transport`, negotiate `query` with terminal approval and
/// print progress to stdout. Returns the final answer.
///
/// The session is closed on every path, including errors and Ctrl-C.
pub async fn run_llm_query(
    transport: &dyn Transport,
    config: &AppConfig,
    settings: LlmSettings,
    query: &str,
) -> anyhow::Result<String> {
    let session = McpSession::connect(transport, config.timeouts.request())
        .await
        .context("failed to establish MCP session")?;
    let session = Arc::new(session);

    let result = negotiate(Arc::clone(&session), config, settings, query).await;
    session.close().await;
    result
}

async fn negotiate(
    session: Arc<McpSession>,
    config: &AppConfig,
    settings: LlmSettings,
    query: &str,
) -> anyhow::Result<String> {
    let options = NegotiationOptions {
        model: settings.model.clone(),
        approval_timeout: config.timeouts.approval(),
    };
    let provider = ChatCompletionsClient::new(settings).context("failed to build LLM client")?;

    let negotiator = Negotiator::new(
        Arc::new(provider),
        session,
        Arc::new(TerminalApproval::new()),
        options,
    )
    .with_events(ConsoleEvents::stdout());

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling query");
            interrupt.cancel();
        }
    });

    let outcome = negotiator.process_query_with_cancel(query, &cancel).await;
    ctrl_c.abort();

    Ok(outcome.context("query failed")?.answer)
}
