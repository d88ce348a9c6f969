//! Error types shared by the session, completion and negotiation layers.

use thiserror::Error;

/// Failures raised by an MCP session or its transport channel.
#[derive(Error, Debug)]
pub enum McpError {
    /// Channel could not be opened or broke mid-session.
    #[error("transport error: {0}")]
    Transport(String),

    /// The `initialize` handshake did not complete.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The requested tool is not registered on the host.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The host rejected the arguments for a tool.
    #[error("invalid arguments: {0}")]
    Argument(String),

    /// The tool handler itself failed.
    #[error("tool invocation failed: {0}")]
    Invocation(String),

    /// The session was closed before the call.
    #[error("session is closed")]
    SessionClosed,

    /// A request was issued before the handshake.
    #[error("session is not initialized")]
    NotInitialized,

    /// A request did not complete in time.
    #[error("timed out waiting for {0}")]
    Timeout(String),

    /// The remote sent something that is not valid JSON-RPC for the request.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    /// Whether the error belongs to a single tool invocation rather than the
    /// session as a whole.
    #[must_use]
    pub fn is_tool_scoped(&self) -> bool {
        matches!(
            self,
            Self::UnknownTool(_) | Self::Argument(_) | Self::Invocation(_)
        )
    }
}

/// Failures raised by the completion provider.
#[derive(Error, Debug)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error body returned by the provider.
        message: String,
    },

    /// Response did not have the expected shape.
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),

    #[error("completion request timed out")]
    Timeout,
}

/// Failures that abort a whole query in the negotiation loop.
#[derive(Error, Debug)]
pub enum NegotiationError {
    /// Catalog listing or a non tool-scoped session failure.
    #[error(transparent)]
    Mcp(#[from] McpError),

    /// The completion provider failed.
    #[error("completion provider error: {0}")]
    Completion(#[from] LlmError),

    /// The enclosing query was cancelled.
    #[error("query cancelled")]
    Cancelled,
}
