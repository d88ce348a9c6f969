//! Completion provider abstraction and conversation types.
//!
//! The negotiation loop talks to the model through [`CompletionProvider`]:
//! one non-streaming completion per call, with the conversation so far, the
//! tool catalog in function-tool form, and a [`ToolChoice`] policy.
//!
//! - [`calls`]: normalization of the two tool-call shapes a model may emit
//! - [`chat_completions`]: `OpenAI`-compatible `/v1/chat/completions` client
//! - [`events`]: progress events emitted while a query is negotiated
//! - [`negotiation`]: the tool-call negotiation loop itself

pub mod calls;
pub mod chat_completions;
pub mod events;
pub mod negotiation;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Value, json};

use crate::error::LlmError;
use crate::mcp::types::ToolDescriptor;

pub use calls::{ParsedArguments, PendingCall, ToolCallRequest};
pub use chat_completions::ChatCompletionsClient;
pub use events::{ConsoleEvents, EventSink, NegotiationEvent};
pub use negotiation::{NegotiationOptions, Negotiator, QueryOutcome, ToolOutcome, ToolStatus};

/// LLM connection and model settings.
#[derive(Clone)]
pub struct LlmSettings {
    /// Base URL for the API (e.g., `https://api.openai.com`).
    pub base_url: String,
    pub api_key: Option<String>,
    /// Model identifier (e.g., `gpt-4o`).
    pub model: String,
    /// Upper bound on one completion round trip.
    pub request_timeout: Duration,
}

impl std::fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmSettings")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("model", &self.model)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

/// Role of a message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    #[serde(default)]
    pub content: Option<String>,
    /// Set on tool messages answering a function-style call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Function-style tool calls requested by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Legacy single function call requested by the assistant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<ToolCallFunction>,
}

impl Message {
    fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(content.into()),
            tool_call_id: None,
            tool_calls: None,
            function_call: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Tool result message; `call_id` is absent for legacy function calls.
    pub fn tool(call_id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: call_id,
            ..Self::new(MessageRole::Tool, content)
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    /// Tool calls requested by this message, in the order they appear.
    ///
    /// Function-style calls take precedence over a legacy `function_call`.
    pub fn tool_call_requests(&self) -> Vec<ToolCallRequest> {
        match (&self.tool_calls, &self.function_call) {
            (Some(calls), _) if !calls.is_empty() => calls
                .iter()
                .map(|call| ToolCallRequest::FunctionStyle {
                    id: call.id.clone(),
                    name: call.function.name.clone(),
                    arguments: call.function.arguments.clone(),
                })
                .collect(),
            (_, Some(function)) => vec![ToolCallRequest::LegacyStyle {
                name: function.name.clone(),
                arguments: function.arguments.clone(),
            }],
            _ => Vec::new(),
        }
    }
}

/// A tool call made by the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: ToolCallFunction,
}

fn function_type() -> String {
    "function".to_string()
}

/// Function details in a tool call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallFunction {
    pub name: String,
    /// Arguments as JSON text. Some providers send an object; it is
    /// re-serialized.
    #[serde(default, deserialize_with = "string_or_json")]
    pub arguments: String,
}

fn string_or_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

/// Whether the model may request tools on a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    Auto,
    None,
}

/// One completion call.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    /// Tools in function-tool form (see [`tool_schema`]).
    pub tools: Vec<Value>,
    pub tool_choice: ToolChoice,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    /// The assistant message.
    pub message: Message,
    pub finish_reason: Option<String>,
}

/// Something that can answer a completion request.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Convert an MCP tool descriptor into a function-tool definition.
pub fn tool_schema(descriptor: &ToolDescriptor) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": descriptor.name,
            "description": descriptor.description,
            "parameters": descriptor.input_schema,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn tool_schema_preserves_descriptor() {
        for descriptor in ToolRegistry::with_default_tools().descriptors() {
            let schema = tool_schema(&descriptor);
            assert_eq!(schema["type"], "function");
            assert_eq!(schema["function"]["name"], descriptor.name.as_str());
            assert_eq!(schema["function"]["description"], descriptor.description.as_str());
            assert_eq!(schema["function"]["parameters"], descriptor.input_schema);
        }
    }

    #[test]
    fn assistant_message_yields_function_style_calls() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [
                {"id": "c1", "type": "function",
                 "function": {"name": "calculate", "arguments": "{\"expression\":\"2+3\"}"}},
                {"id": "c2", "function": {"name": "get_weather", "arguments": {"location": "Pune"}}}
            ]
        }))
        .unwrap();
        let requests = message.tool_call_requests();
        assert_eq!(
            requests,
            vec![
                ToolCallRequest::FunctionStyle {
                    id: "c1".into(),
                    name: "calculate".into(),
                    arguments: "{\"expression\":\"2+3\"}".into(),
                },
                ToolCallRequest::FunctionStyle {
                    id: "c2".into(),
                    name: "get_weather".into(),
                    arguments: "{\"location\":\"Pune\"}".into(),
                },
            ]
        );
    }

    #[test]
    fn legacy_function_call_is_recognized() {
        let message: Message = serde_json::from_value(json!({
            "role": "assistant",
            "function_call": {"name": "calculate", "arguments": "{}"}
        }))
        .unwrap();
        assert_eq!(
            message.tool_call_requests(),
            vec![ToolCallRequest::LegacyStyle {
                name: "calculate".into(),
                arguments: "{}".into(),
            }]
        );
    }

    #[test]
    fn tool_message_serializes_call_id() {
        let wire = serde_json::to_value(Message::tool(Some("c1".into()), "5")).unwrap();
        assert_eq!(wire, json!({"role": "tool", "content": "5", "tool_call_id": "c1"}));
    }

    #[test]
    fn settings_debug_redacts_key() {
        let settings = LlmSettings {
            base_url: "https://api.openai.com".into(),
            api_key: Some("sk-secret".into()),
            model: "gpt-4o".into(),
            request_timeout: Duration::from_secs(1),
        };
        assert!(!format!("{settings:?}").contains("sk-secret"));
    }
}
