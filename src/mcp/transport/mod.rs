//! Message channels between an MCP client and a tool host.
//!
//! A [`Transport`] knows how to open a [`Channel`]: a bidirectional pipe of
//! serialized JSON-RPC messages. Each transport pumps bytes with background
//! tasks; the channel owns those tasks (and the child process, for stdio)
//! and releases them when closed or dropped.

pub mod memory;
pub mod sse;
pub mod stdio;

use std::time::Duration;

use async_trait::async_trait;
use tokio::{
    process::Child,
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::McpError;

pub use memory::MemoryTransport;
pub use sse::SseTransport;
pub use stdio::StdioTransport;

/// Inbound half of a channel. Errors report a broken transport.
pub type InboundRx = mpsc::UnboundedReceiver<Result<String, McpError>>;
pub type InboundTx = mpsc::UnboundedSender<Result<String, McpError>>;

/// Grace period for a child process to exit after its stdin closes.
const CHILD_EXIT_GRACE: Duration = Duration::from_secs(2);

/// Something that can open a message channel to a tool host.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable endpoint for logs.
    fn describe(&self) -> String;

    async fn connect(&self) -> Result<Channel, McpError>;
}

/// An open message channel.
pub struct Channel {
    outbound: mpsc::UnboundedSender<String>,
    inbound: InboundRx,
    tasks: Vec<JoinHandle<()>>,
    child: Option<Child>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("tasks", &self.tasks.len())
            .field("child", &self.child.as_ref().and_then(Child::id))
            .finish_non_exhaustive()
    }
}

impl Channel {
    pub fn new(outbound: mpsc::UnboundedSender<String>, inbound: InboundRx) -> Self {
        Self {
            outbound,
            inbound,
            tasks: Vec::new(),
            child: None,
        }
    }

    /// Tie a pump task's lifetime to the channel.
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Tie a child process's lifetime to the channel.
    #[must_use]
    pub fn with_child(mut self, child: Child) -> Self {
        self.child = Some(child);
        self
    }

    /// Queue one serialized message for delivery.
    pub fn send(&self, message: String) -> Result<(), McpError> {
        self.outbound
            .send(message)
            .map_err(|err| McpError::Transport(format!("channel writer has stopped: {err}")))
    }

    /// Next inbound message.
    pub async fn recv(&mut self) -> Result<String, McpError> {
        match self.inbound.recv().await {
            Some(message) => message,
            None => Err(McpError::Transport("channel closed by remote".to_string())),
        }
    }

    /// Stop the pump tasks and reap the child process, if any.
    pub async fn close(mut self) {
        self.inbound.close();
        for task in self.tasks.drain(..) {
            task.abort();
        }
        // The writer task owned stdin; aborting it lets the child see EOF.
        if let Some(mut child) = self.child.take() {
            if tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await.is_err() {
                tracing::warn!("MCP server process did not exit after stdin closed; killing it");
                if let Err(err) = child.kill().await {
                    tracing::warn!(error = %err, "failed to kill MCP server process");
                }
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        // Children are spawned with kill_on_drop.
    }
}
