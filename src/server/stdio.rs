//! Stdio serving loop. Stdout carries protocol messages only.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::{ConnectionState, Dispatcher};

/// Serve one client on the process's stdin/stdout until stdin closes.
pub async fn serve_stdio(dispatcher: Arc<Dispatcher>) -> std::io::Result<()> {
    tracing::info!(name: "server.started", transport = "stdio", "serving MCP over stdio");
    serve_lines(&dispatcher, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Serve newline-delimited JSON-RPC from `reader`, replying on `writer`.
pub async fn serve_lines<R, W>(
    dispatcher: &Dispatcher,
    reader: R,
    mut writer: W,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut state = ConnectionState::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(reply) = dispatcher.handle_line(&mut state, line).await {
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
    }

    tracing::info!("stdin closed; stopping stdio server");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use serde_json::Value;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn answers_each_request_on_its_own_line() {
        let dispatcher = Dispatcher::new(Arc::new(ToolRegistry::with_default_tools()), "test");
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"get_weather","arguments":{"location":"Lucknow"}}}"#,
            "\n",
        );

        let (mut client, server) = tokio::io::duplex(64 * 1024);
        let (server_read, server_write) = tokio::io::split(server);
        let (mut client_read, mut client_write) = tokio::io::split(&mut client);

        client_write.write_all(input.as_bytes()).await.unwrap();
        client_write.shutdown().await.unwrap();
        serve_lines(&dispatcher, server_read, server_write).await.unwrap();

        let mut output = String::new();
        client_read.read_to_string(&mut output).await.unwrap();
        let replies: Vec<Value> = output
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0]["id"], 1);
        assert_eq!(
            replies[1]["result"]["content"][0]["text"],
            "Weather in Lucknow: Sunny, 72°F"
        );
    }
}
