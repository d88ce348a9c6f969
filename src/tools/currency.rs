//! `convert_currency`: conversion through fixed USD rates.

use std::collections::HashMap;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;

use super::{ToolError, TypedTool, format_float};

/// Units of each currency per one US dollar.
const USD_RATES: [(&str, f64); 5] = [
    ("USD", 1.0),
    ("EUR", 0.85),
    ("GBP", 0.73),
    ("JPY", 110.0),
    ("INR", 83.0),
];

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ConvertCurrencyArgs {
    pub amount: f64,
    /// ISO 4217 code, e.g. `USD`.
    pub from_currency: String,
    pub to_currency: String,
}

#[derive(Debug, Clone)]
pub struct ConvertCurrencyTool {
    rates: HashMap<&'static str, f64>,
}

impl Default for ConvertCurrencyTool {
    fn default() -> Self {
        Self {
            rates: USD_RATES.into_iter().collect(),
        }
    }
}

impl ConvertCurrencyTool {
    /// Convert `amount` or `None` when either code is not in the rate table.
    pub fn convert(&self, amount: f64, from: &str, to: &str) -> Option<f64> {
        let from_rate = self.rates.get(from)?;
        let to_rate = self.rates.get(to)?;
        Some(amount / from_rate * to_rate)
    }
}

#[async_trait]
impl TypedTool for ConvertCurrencyTool {
    type Args = ConvertCurrencyArgs;

    const NAME: &'static str = "convert_currency";
    const DESCRIPTION: &'static str = "Convert amount from one currency to another.";

    async fn run(&self, args: ConvertCurrencyArgs) -> Result<String, ToolError> {
        let ConvertCurrencyArgs {
            amount,
            from_currency: from,
            to_currency: to,
        } = args;
        // An unknown pair is an answer, not a failure.
        Ok(match self.convert(amount, &from, &to) {
            Some(converted) => format!("{} {from} = {converted:.2} {to}", format_float(amount)),
            None => format!("Unsupported currency pair: {from} to {to}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::Tool;
    use serde_json::json;

    async fn convert(args: serde_json::Value) -> String {
        ConvertCurrencyTool::default().call(args).await.unwrap()
    }

    #[tokio::test]
    async fn converts_known_pairs() {
        assert_eq!(
            convert(json!({"amount": 100, "from_currency": "USD", "to_currency": "EUR"})).await,
            "100.0 USD = 85.00 EUR"
        );
        assert_eq!(
            convert(json!({"amount": 85.0, "from_currency": "EUR", "to_currency": "INR"})).await,
            "85.0 EUR = 8300.00 INR"
        );
    }

    #[tokio::test]
    async fn unknown_pair_is_reported_in_band() {
        assert_eq!(
            convert(json!({"amount": 1, "from_currency": "USD", "to_currency": "XYZ"})).await,
            "Unsupported currency pair: USD to XYZ"
        );
    }

    #[tokio::test]
    async fn amount_must_be_numeric() {
        let err = ConvertCurrencyTool::default()
            .call(json!({"amount": "ten", "from_currency": "USD", "to_currency": "EUR"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
