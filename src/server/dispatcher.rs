//! JSON-RPC method dispatch for the tool host.
//!
//! The dispatcher is transport-agnostic: the stdio loop, the SSE handlers and
//! the in-memory transport all feed it one serialized message at a time along
//! with the per-connection [`ConnectionState`].

use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};

use crate::mcp::types::{
    CallToolParams, CallToolResult, Implementation, InitializeParams, InitializeResult,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, PROTOCOL_VERSION, ServerCapabilities,
    ToolsCapability, codes, methods,
};
use crate::tools::{ToolError, ToolRegistry};

/// Handshake progress of one client connection.
#[derive(Debug, Default, Clone)]
pub struct ConnectionState {
    initialized: bool,
}

impl ConnectionState {
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[derive(Debug)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    info: Implementation,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>, server_name: impl Into<String>) -> Self {
        Self {
            registry,
            info: Implementation {
                name: server_name.into(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
        }
    }

    /// Handle one serialized message; returns the serialized reply, if any.
    pub async fn handle_line(&self, state: &mut ConnectionState, line: &str) -> Option<String> {
        let value: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "received malformed JSON-RPC message");
                return encode(&JsonRpcResponse::error(
                    Value::Null,
                    codes::PARSE_ERROR,
                    format!("Parse error: {err}"),
                ));
            }
        };

        // Replies from the client to server-initiated requests are not used.
        if value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            return None;
        }

        let id = value.get("id").cloned().unwrap_or(Value::Null);
        let request: JsonRpcRequest = match serde_json::from_value(value) {
            Ok(request) => request,
            Err(err) => {
                return encode(&JsonRpcResponse::error(
                    id,
                    codes::INVALID_REQUEST,
                    format!("Invalid request: {err}"),
                ));
            }
        };

        let response = self.handle_request(state, request).await?;
        encode(&response)
    }

    /// Handle a parsed request. Notifications produce no response.
    pub async fn handle_request(
        &self,
        state: &mut ConnectionState,
        request: JsonRpcRequest,
    ) -> Option<JsonRpcResponse> {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;

        let Some(id) = id else {
            if method == methods::INITIALIZED {
                tracing::debug!("client confirmed initialization");
            } else {
                tracing::debug!(method = %method, "ignoring notification");
            }
            return None;
        };

        let response = match method.as_str() {
            methods::INITIALIZE => self.initialize(state, id, params),
            methods::PING => JsonRpcResponse::success(id, json!({})),
            methods::LIST_TOOLS | methods::CALL_TOOL if !state.initialized => {
                JsonRpcResponse::error(id, codes::NOT_INITIALIZED, "Session not initialized")
            }
            methods::LIST_TOOLS => {
                let result = ListToolsResult {
                    tools: self.registry.descriptors(),
                    next_cursor: None,
                };
                respond(id, &result)
            }
            methods::CALL_TOOL => self.call_tool(id, params).await,
            other => {
                tracing::debug!(method = other, "method not found");
                JsonRpcResponse::error(
                    id,
                    codes::METHOD_NOT_FOUND,
                    format!("Method not found: {other}"),
                )
            }
        };
        Some(response)
    }

    fn initialize(&self, state: &mut ConnectionState, id: Value, params: Value) -> JsonRpcResponse {
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("Invalid initialize params: {err}"),
                );
            }
        };
        if params.protocol_version != PROTOCOL_VERSION {
            tracing::info!(
                requested = %params.protocol_version,
                offered = PROTOCOL_VERSION,
                "client requested a different protocol version"
            );
        }
        tracing::info!(
            client = %params.client_info.name,
            version = %params.client_info.version,
            "client initialized"
        );
        state.initialized = true;

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: false,
                }),
            },
            server_info: self.info.clone(),
        };
        respond(id, &result)
    }

    async fn call_tool(&self, id: Value, params: Value) -> JsonRpcResponse {
        let params: CallToolParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(err) => {
                return JsonRpcResponse::error(
                    id,
                    codes::INVALID_PARAMS,
                    format!("Invalid tools/call params: {err}"),
                );
            }
        };

        tracing::info!(tool = %params.name, "tools/call");
        match self.registry.call(&params.name, params.arguments).await {
            Ok(text) => respond(id, &CallToolResult::text(text)),
            Err(err @ ToolError::Unknown(_)) => {
                JsonRpcResponse::error(id, codes::UNKNOWN_TOOL, err.to_string())
            }
            Err(err @ ToolError::InvalidArguments(_)) => {
                JsonRpcResponse::error(id, codes::INVALID_PARAMS, err.to_string())
            }
            Err(ToolError::Failed(message)) => {
                tracing::warn!(tool = %params.name, error = %message, "tool handler failed");
                respond(id, &CallToolResult::error(message))
            }
        }
    }
}

fn respond(id: Value, result: &impl Serialize) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(err) => JsonRpcResponse::error(id, codes::INTERNAL_ERROR, err.to_string()),
    }
}

fn encode(response: &JsonRpcResponse) -> Option<String> {
    match serde_json::to_string(response) {
        Ok(line) => Some(line),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize JSON-RPC response");
            None
        }
    }
}
