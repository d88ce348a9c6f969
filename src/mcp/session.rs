//! Client side of an MCP session.
//!
//! A session wraps one [`Channel`] and walks the lifecycle
//! `Created -> Initialized -> Closed`. Requests are issued one at a time:
//! each send waits for the response carrying the same id, skipping server
//! notifications, under the configured request timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Mutex;

use super::transport::{Channel, Transport};
use super::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION,
    ToolDescriptor, codes, methods,
};
use crate::error::McpError;

/// Tool discovery and invocation, as consumed by the negotiation loop.
#[async_trait]
pub trait ToolHost: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Initialized,
    Closed,
}

#[derive(Debug)]
struct Inner {
    channel: Option<Channel>,
    state: SessionState,
}

#[derive(Debug)]
pub struct McpSession {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    request_timeout: Duration,
    client_info: Implementation,
}

impl McpSession {
    /// Wrap an open channel. The session starts in [`SessionState::Created`].
    pub fn new(channel: Channel, request_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                channel: Some(channel),
                state: SessionState::Created,
            }),
            next_id: AtomicU64::new(1),
            request_timeout,
            client_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Open a channel through `transport` and complete the handshake.
    pub async fn connect(
        transport: &dyn Transport,
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        tracing::info!(
            name: "mcp.session.connecting",
            endpoint = %transport.describe(),
            "connecting to MCP server"
        );
        let channel = transport.connect().await?;
        let session = Self::new(channel, request_timeout);
        session.initialize().await?;
        Ok(session)
    }

    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.state
    }

    /// Perform the `initialize` handshake and send `notifications/initialized`.
    pub async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let mut inner = self.inner.lock().await;
        match inner.state {
            SessionState::Created => {}
            SessionState::Initialized => {
                return Err(McpError::Handshake("session is already initialized".into()));
            }
            SessionState::Closed => return Err(McpError::SessionClosed),
        }

        let params = serde_json::to_value(InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: json!({}),
            client_info: self.client_info.clone(),
        })?;
        let result = self
            .request(&mut inner, methods::INITIALIZE, params)
            .await
            .map_err(|err| match err {
                McpError::SessionClosed => err,
                other => McpError::Handshake(other.to_string()),
            })?
            .map_err(|err| McpError::Handshake(format!("{} ({})", err.message, err.code)))?;
        let result: InitializeResult = serde_json::from_value(result)
            .map_err(|err| McpError::Handshake(format!("malformed initialize result: {err}")))?;

        if let Some(channel) = inner.channel.as_ref() {
            let note = serde_json::to_string(&JsonRpcRequest::notification(methods::INITIALIZED))?;
            channel
                .send(note)
                .map_err(|err| McpError::Handshake(err.to_string()))?;
        }
        inner.state = SessionState::Initialized;

        tracing::info!(
            name: "mcp.session.initialized",
            server = %result.server_info.name,
            version = %result.server_info.version,
            protocol = %result.protocol_version,
            "MCP session initialized"
        );
        Ok(result)
    }

    /// Every tool the host advertises, following pagination cursors.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut inner = self.inner.lock().await;
        ensure_initialized(inner.state)?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = cursor.map_or(Value::Null, |c| json!({ "cursor": c }));
            let result = self
                .request(&mut inner, methods::LIST_TOOLS, params)
                .await?
                .map_err(rpc_error)?;
            let page: ListToolsResult = serde_json::from_value(result)
                .map_err(|err| McpError::Protocol(format!("malformed tools/list result: {err}")))?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    /// Invoke `name` with `arguments`.
    ///
    /// A result flagged `isError` becomes [`McpError::Invocation`].
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
    ) -> Result<CallToolResult, McpError> {
        let mut inner = self.inner.lock().await;
        ensure_initialized(inner.state)?;

        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self
            .request(&mut inner, methods::CALL_TOOL, params)
            .await?
            .map_err(rpc_error)?;
        let result: CallToolResult = serde_json::from_value(result)
            .map_err(|err| McpError::Protocol(format!("malformed tools/call result: {err}")))?;
        if result.is_error {
            return Err(McpError::Invocation(result.first_text().to_string()));
        }
        Ok(result)
    }

    /// Release the channel. Later calls fail with [`McpError::SessionClosed`].
    pub async fn close(&self) {
        let channel = {
            let mut inner = self.inner.lock().await;
            inner.state = SessionState::Closed;
            inner.channel.take()
        };
        if let Some(channel) = channel {
            channel.close().await;
            tracing::info!(name: "mcp.session.closed", "MCP session closed");
        }
    }

    /// Send one request and wait for its response.
    ///
    /// The outer error is a channel failure; the inner one a JSON-RPC error
    /// returned by the host.
    async fn request(
        &self,
        inner: &mut Inner,
        method: &str,
        params: Value,
    ) -> Result<Result<Value, JsonRpcError>, McpError> {
        let channel = inner.channel.as_mut().ok_or(McpError::SessionClosed)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        channel.send(serde_json::to_string(&JsonRpcRequest::new(id, method, params))?)?;
        tracing::debug!(method, id, "sent MCP request");

        let response = tokio::time::timeout(self.request_timeout, await_response(channel, id))
            .await
            .map_err(|_elapsed| McpError::Timeout(method.to_string()))??;

        Ok(match (response.result, response.error) {
            (_, Some(error)) => Err(error),
            (Some(result), None) => Ok(result),
            (None, None) => Ok(Value::Null),
        })
    }
}

#[async_trait]
impl ToolHost for McpSession {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        McpSession::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        McpSession::call_tool(self, name, arguments).await
    }
}

fn ensure_initialized(state: SessionState) -> Result<(), McpError> {
    match state {
        SessionState::Initialized => Ok(()),
        SessionState::Created => Err(McpError::NotInitialized),
        SessionState::Closed => Err(McpError::SessionClosed),
    }
}

async fn await_response(channel: &mut Channel, id: u64) -> Result<JsonRpcResponse, McpError> {
    loop {
        let line = channel.recv().await?;
        let value: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed message from MCP server");
                continue;
            }
        };
        if value.get("method").is_some() {
            tracing::debug!(method = ?value.get("method"), "ignoring server-initiated message");
            continue;
        }
        if value.get("id").and_then(Value::as_u64) != Some(id) {
            tracing::debug!(expected = id, got = ?value.get("id"), "skipping unmatched response");
            continue;
        }
        return serde_json::from_value(value)
            .map_err(|err| McpError::Protocol(format!("malformed response: {err}")));
    }
}

fn rpc_error(err: JsonRpcError) -> McpError {
    match err.code {
        codes::UNKNOWN_TOOL => McpError::UnknownTool(err.message),
        codes::INVALID_PARAMS => McpError::Argument(err.message),
        codes::NOT_INITIALIZED => McpError::NotInitialized,
        code => McpError::Protocol(format!("{} ({code})", err.message)),
    }
}
