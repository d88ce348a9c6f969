//! `get_weather`: canned forecast for any location.

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{ToolError, TypedTool};

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetWeatherArgs {
    /// City or place name.
    pub location: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GetWeatherTool;

#[async_trait]
impl TypedTool for GetWeatherTool {
    type Args = GetWeatherArgs;

    const NAME: &'static str = "get_weather";
    const DESCRIPTION: &'static str = "Get the current weather for a specified location.";

    async fn run(&self, args: GetWeatherArgs) -> Result<String, ToolError> {
        Ok(format!("Weather in {}: Sunny, 72°F", args.location))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use serde_json::json;

    #[tokio::test]
    async fn reports_sunny_weather() {
        let out = GetWeatherTool
            .call(json!({"location": "Lucknow"}))
            .await
            .unwrap();
        assert_eq!(out, "Weather in Lucknow: Sunny, 72°F");
    }
}
