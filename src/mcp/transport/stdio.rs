//! Subprocess transport: newline-delimited JSON over the child's stdio.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    process::Command,
    sync::mpsc,
};

use super::{Channel, Transport};
use crate::error::McpError;

/// Launches the tool host as a child process.
#[derive(Debug, Clone)]
pub struct StdioTransport {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl StdioTransport {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn describe(&self) -> String {
        format!("stdio:{} {}", self.command, self.args.join(" "))
    }

    async fn connect(&self) -> Result<Channel, McpError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|err| {
            McpError::Transport(format!(
                "failed to spawn MCP server process `{}`: {err}",
                self.command
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Transport("child stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Transport("child stdout is not piped".to_string()))?;

        tracing::debug!(command = %self.command, pid = ?child.id(), "spawned MCP server process");

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        // Writer: one message per line.
        let writer = tokio::spawn(async move {
            let mut w = stdin;
            while let Some(line) = out_rx.recv().await {
                let line = line.replace('\n', "");
                let written = async {
                    w.write_all(line.as_bytes()).await?;
                    w.write_all(b"\n").await?;
                    w.flush().await
                };
                if let Err(err) = written.await {
                    tracing::warn!(error = %err, "failed writing to MCP server stdin");
                    break;
                }
            }
        });

        // Reader: forward non-empty lines; EOF closes the inbound queue.
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        if in_tx.send(Ok(line.to_string())).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = in_tx.send(Err(McpError::Transport(format!(
                            "failed reading MCP server stdout: {err}"
                        ))));
                        break;
                    }
                }
            }
        });

        Ok(Channel::new(out_tx, in_rx)
            .with_task(writer)
            .with_task(reader)
            .with_child(child))
    }
}
