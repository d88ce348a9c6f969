//! Tool-call shapes and their normalized form.

use serde_json::Value;

/// A tool call as the model emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCallRequest {
    /// Entry of `tool_calls`, answered by a tool message with the same id.
    FunctionStyle {
        id: String,
        name: String,
        arguments: String,
    },
    /// Single `function_call` with no id.
    LegacyStyle { name: String, arguments: String },
}

impl ToolCallRequest {
    /// Collapse both shapes into a [`PendingCall`], parsing the arguments.
    pub fn normalize(self) -> PendingCall {
        let (id, name, arguments) = match self {
            Self::FunctionStyle {
                id,
                name,
                arguments,
            } => (Some(id), name, arguments),
            Self::LegacyStyle { name, arguments } => (None, name, arguments),
        };
        PendingCall {
            id,
            name,
            arguments: ParsedArguments::parse(&arguments),
        }
    }
}

/// A tool call awaiting approval.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: ParsedArguments,
}

/// Tool-call arguments after lenient parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedArguments {
    Structured(Value),
    /// Text that did not parse as JSON, kept verbatim.
    Raw(String),
}

impl ParsedArguments {
    pub fn parse(text: &str) -> Self {
        serde_json::from_str(text).map_or_else(|_| Self::Raw(text.to_string()), Self::Structured)
    }

    /// Value forwarded to the host. Raw text travels as a JSON string.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Structured(value) => value.clone(),
            Self::Raw(text) => Value::String(text.clone()),
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, Self::Raw(_))
    }
}

impl std::fmt::Display for ParsedArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structured(value) => write!(f, "{value}"),
            Self::Raw(text) => f.write_str(text),
        }
    }
}
