//! Progress events emitted while a query is negotiated.
//!
//! The negotiation loop reports what it is doing through these events so a
//! front end (the console clients, a log sink) can render progress without
//! the loop knowing about stdout.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// A tool as shown to the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSummary {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data")]
pub enum NegotiationEvent {
    /// The tool catalog was fetched for this query.
    #[serde(rename = "tools.listed")]
    ToolsListed { tools: Vec<ToolSummary> },

    /// The model asked for a tool; approval is pending.
    #[serde(rename = "tool.requested")]
    ToolRequested {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        arguments: String,
    },

    #[serde(rename = "tool.completed")]
    ToolCompleted {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        output: String,
    },

    #[serde(rename = "tool.denied")]
    ToolDenied {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
    },

    /// The host reported a tool-scoped failure.
    #[serde(rename = "tool.failed")]
    ToolFailed {
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        error: String,
    },

    /// Final answer text.
    #[serde(rename = "answer")]
    Answer { text: String },
}

impl NegotiationEvent {
    /// Console rendering, or `None` for events the console does not show.
    pub fn render(&self) -> Option<String> {
        match self {
            Self::ToolsListed { tools } => {
                let mut out = String::from("Connected to server with tools:");
                for tool in tools {
                    out.push_str(&format!("\n  • {}: {}", tool.name, tool.description));
                }
                Some(out)
            }
            Self::ToolRequested { .. } => None,
            Self::ToolCompleted { name, output, .. } => {
                Some(format!("→ {name} returned: {output}"))
            }
            Self::ToolDenied { name, .. } => Some(format!("→ Skipped {name}")),
            Self::ToolFailed { name, error, .. } => Some(format!("→ {name} failed: {error}")),
            Self::Answer { text } => Some(format!("\nFinal Response: {text}")),
        }
    }
}

/// Receives progress events as the loop produces them.
///
/// Called inline from the loop: whatever a sink writes is out before the
/// next approval prompt.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: NegotiationEvent);
}

/// Forwards events to a channel. Send failures are ignored.
impl EventSink for mpsc::UnboundedSender<NegotiationEvent> {
    fn emit(&self, event: NegotiationEvent) {
        let _ = self.send(event);
    }
}

/// Writes [`NegotiationEvent::render`] lines, one per event.
pub struct ConsoleEvents<W> {
    out: Mutex<W>,
}

impl<W> std::fmt::Debug for ConsoleEvents<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleEvents").finish_non_exhaustive()
    }
}

impl ConsoleEvents<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> ConsoleEvents<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn into_inner(self) -> W {
        self.out.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> EventSink for ConsoleEvents<W> {
    fn emit(&self, event: NegotiationEvent) {
        let Some(line) = event.render() else {
            return;
        };
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            tracing::warn!(error = %err, "failed to write progress line");
        }
    }
}
