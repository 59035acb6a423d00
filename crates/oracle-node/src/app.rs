//! Quote application: configured prices, checked within a relative tolerance

use std::collections::BTreeMap;

use oracle_tss_core::app::{async_trait, Computed, OracleApp};
use oracle_tss_core::{Error, Request, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Method served by [`QuoteApp`]
pub const GET_PRICE: &str = "get_price";

/// Largest accepted relative price difference by default (1%)
pub const DEFAULT_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuoteConfig {
    /// Price by symbol
    pub prices: BTreeMap<String, f64>,
    /// Relative tolerance when checking another node's price
    pub tolerance: f64,
}

impl Default for QuoteConfig {
    fn default() -> Self {
        Self {
            prices: BTreeMap::new(),
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

pub struct QuoteApp {
    config: QuoteConfig,
}

impl QuoteApp {
    pub fn new(config: QuoteConfig) -> Self {
        Self { config }
    }

    fn check_method(method: &str) -> Result<()> {
        if method != GET_PRICE {
            return Err(Error::UnknownMethod(format!("quote.{}", method)));
        }
        Ok(())
    }

    fn symbol(params: &Value) -> Result<&str> {
        params
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Deserialization("Missing symbol".into()))
    }

    fn price(&self, symbol: &str) -> Result<f64> {
        self.config
            .prices
            .get(symbol)
            .copied()
            .ok_or_else(|| Error::InvalidConfig(format!("No price for {}", symbol)))
    }
}

#[async_trait]
impl OracleApp for QuoteApp {
    fn name(&self) -> &str {
        "quote"
    }

    async fn compute(&self, method: &str, params: &Value) -> Result<Computed> {
        Self::check_method(method)?;
        let symbol = Self::symbol(params)?;
        let price = self.price(symbol)?;

        Ok(Computed {
            result: json!({ "symbol": symbol, "price": price }),
            raw: Some(json!({ "source": "config", "symbol": symbol, "price": price })),
        })
    }

    async fn validate_and_compute(&self, request: &Request) -> Result<Value> {
        Self::check_method(&request.method)?;
        let symbol = Self::symbol(&request.data.params)?;
        let own = self.price(symbol)?;

        let result = &request.data.result;
        if result.get("symbol").and_then(Value::as_str) != Some(symbol) {
            return Err(Error::ResultMismatch(format!(
                "Result is not a quote of {}",
                symbol
            )));
        }
        let claimed = result
            .get("price")
            .and_then(Value::as_f64)
            .ok_or_else(|| Error::ResultMismatch("Missing price".into()))?;

        if (claimed - own).abs() > own.abs() * self.config.tolerance {
            return Err(Error::ResultMismatch(format!(
                "{} quoted at {}, expected {} within {}",
                symbol, claimed, own, self.config.tolerance
            )));
        }
        Ok(result.clone())
    }
}
