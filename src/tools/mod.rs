//! Host-side tool registry.
//!
//! A tool is a named handler with a description and a JSON input schema.
//! Most tools implement [`TypedTool`]: they declare a `Deserialize +
//! JsonSchema` argument struct, the schema is derived from it, and incoming
//! arguments are decoded into it before the handler runs.
//!
//! # Example
//!
//! ```rust
//! use mcp_tool_loop::tools::ToolRegistry;
//!
//! let registry = ToolRegistry::with_default_tools();
//! let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
//! assert_eq!(names, ["get_weather", "calculate", "convert_currency"]);
//! ```

pub mod calculator;
pub mod currency;
pub mod weather;

use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

use crate::mcp::types::ToolDescriptor;

pub use calculator::CalculateTool;
pub use currency::ConvertCurrencyTool;
pub use weather::GetWeatherTool;

/// Failures a tool can report to the host.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    Unknown(String),

    /// Arguments did not match the tool's input schema.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The handler ran and failed.
    #[error("{0}")]
    Failed(String),
}

/// A tool the host can dispatch `tools/call` requests to.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn call(&self, arguments: Value) -> Result<String, ToolError>;

    fn descriptor(&self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// A tool whose schema and argument decoding come from a typed struct.
#[async_trait]
pub trait TypedTool: Send + Sync + std::fmt::Debug {
    type Args: DeserializeOwned + JsonSchema + Send;

    const NAME: &'static str;
    const DESCRIPTION: &'static str;

    async fn run(&self, args: Self::Args) -> Result<String, ToolError>;
}

#[async_trait]
impl<T: TypedTool> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        T::DESCRIPTION
    }

    fn input_schema(&self) -> Value {
        schema_for_args::<T::Args>()
    }

    async fn call(&self, arguments: Value) -> Result<String, ToolError> {
        let args = decode_args::<T::Args>(arguments)?;
        self.run(args).await
    }
}

/// Derive the input schema for an argument struct.
///
/// The generator's `$schema` and `title` keys are dropped; what remains is the
/// plain object schema clients forward to the model.
pub fn schema_for_args<A: JsonSchema>() -> Value {
    let schema = schemars::schema_for!(A);
    let mut value = serde_json::to_value(&schema)
        .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    value
}

/// Decode `tools/call` arguments into a typed struct.
///
/// Absent arguments decode as an empty object. Anything that is not an
/// object (for example a raw string forwarded by a lenient client) is an
/// argument error.
pub fn decode_args<A: DeserializeOwned>(arguments: Value) -> Result<A, ToolError> {
    let arguments = match arguments {
        Value::Null => Value::Object(serde_json::Map::new()),
        Value::Object(_) => arguments,
        other => {
            return Err(ToolError::InvalidArguments(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )));
        }
    };
    serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Render a float the way a calculator display would: 12 significant digits,
/// always at least one decimal, scientific notation outside `[1e-4, 1e16)`.
pub fn format_float(value: f64) -> String {
    if !value.is_finite() {
        return value.to_string();
    }
    let rounded: f64 = format!("{value:.11e}").parse().unwrap_or(value);
    let magnitude = rounded.abs();
    if rounded != 0.0 && !(1e-4..1e16).contains(&magnitude) {
        // Rust renders `1.5e-5`; pad the exponent to `1.5e-05` / `1e+16`.
        let sci = format!("{rounded:e}");
        return match sci.split_once('e') {
            Some((mantissa, exp)) => {
                let (sign, digits) = exp
                    .strip_prefix('-')
                    .map_or(("+", exp), |rest| ("-", rest));
                format!("{mantissa}e{sign}{digits:0>2}")
            }
            None => sci,
        };
    }
    let text = rounded.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Insertion-ordered catalog of tools with unique names.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `get_weather`, `calculate` and `convert_currency`.
    pub fn with_default_tools() -> Self {
        Self::new()
            .with_tool(Arc::new(GetWeatherTool))
            .with_tool(Arc::new(CalculateTool::default()))
            .with_tool(Arc::new(ConvertCurrencyTool::default()))
    }

    #[must_use]
    pub fn with_tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.register(tool);
        self
    }

    /// Add a tool. A tool with the same name is replaced in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        if let Some(slot) = self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            tracing::warn!(tool = %tool.name(), "replacing previously registered tool");
            *slot = tool;
        } else {
            self.tools.push(tool);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools.iter().map(|t| t.descriptor()).collect()
    }

    pub async fn call(&self, name: &str, arguments: Value) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::Unknown(name.to_string()))?;
        tool.call(arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            self.0
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn call(&self, arguments: Value) -> Result<String, ToolError> {
            Ok(arguments.to_string())
        }
    }

    #[test]
    fn default_registry_lists_tools_in_order() {
        let registry = ToolRegistry::with_default_tools();
        let names: Vec<_> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, ["get_weather", "calculate", "convert_currency"]);
    }

    #[test]
    fn register_replaces_same_name() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo("first")));
        registry.register(Arc::new(Echo("second")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.descriptors()[0].description, "second");
    }

    #[tokio::test]
    async fn unknown_tool_is_reported() {
        let registry = ToolRegistry::with_default_tools();
        let err = registry.call("nope", json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::Unknown("nope".into()));
    }

    #[test]
    fn schema_is_derived_from_argument_types() {
        let registry = ToolRegistry::with_default_tools();
        let schema = registry.get("convert_currency").unwrap().input_schema();
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["amount"]["type"], "number");
        assert_eq!(schema["properties"]["from_currency"]["type"], "string");
        assert!(schema.get("$schema").is_none());
        let required: Vec<_> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"to_currency"));
    }

    #[test]
    fn raw_string_arguments_are_rejected() {
        let err = decode_args::<calculator::CalculateArgs>(Value::String("not json".into()))
            .unwrap_err();
        assert_eq!(
            err,
            ToolError::InvalidArguments("expected a JSON object, got a string".into())
        );
    }

    #[test]
    fn formats_floats_like_a_calculator() {
        assert_eq!(format_float(90.0 * 68.6), "6174.0");
        assert_eq!(format_float(3.5), "3.5");
        assert_eq!(format_float(85.0), "85.0");
        assert_eq!(format_float(0.1 + 0.2), "0.3");
        assert_eq!(format_float(1e20), "1e+20");
        assert_eq!(format_float(1.5e-5), "1.5e-05");
        assert_eq!(format_float(0.0), "0.0");
    }
}
