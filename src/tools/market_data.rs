//! Market data tools: equity snapshots, historical prices, crypto snapshots

use super::http::ApiClient;
use super::{ToolRegistry, TypedTool};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const GET_PRICE_SNAPSHOT: &str = "get_price_snapshot";
pub const GET_PRICES: &str = "get_prices";
pub const GET_CRYPTO_PRICE_SNAPSHOT: &str = "get_crypto_price_snapshot";

pub fn register(registry: &mut ToolRegistry, api: ApiClient) {
    registry.register(PriceSnapshotTool { api: api.clone() });
    registry.register(PricesTool { api: api.clone() });
    registry.register(CryptoSnapshotTool { api });
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct TickerInput {
    /// Stock ticker symbol, e.g. "AAPL"
    pub ticker: String,
}

pub struct PriceSnapshotTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for PriceSnapshotTool {
    type Input = TickerInput;

    fn name(&self) -> &'static str {
        GET_PRICE_SNAPSHOT
    }

    fn description(&self) -> &'static str {
        "Get the latest price snapshot (price, day change, volume) for a stock ticker."
    }

    async fn call(&self, input: TickerInput) -> Result<Value> {
        self.api
            .get_json(
                GET_PRICE_SNAPSHOT,
                "/prices/snapshot",
                &[("ticker", input.ticker.to_uppercase())],
            )
            .await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PricesInput {
    /// Stock ticker symbol, e.g. "AAPL"
    pub ticker: String,
    /// Start date, YYYY-MM-DD
    pub start_date: String,
    /// End date, YYYY-MM-DD
    pub end_date: String,
    /// Bar interval: "minute", "day", "week", "month" or "year" (default "day")
    #[serde(default)]
    pub interval: Option<String>,
    /// Number of intervals per bar (default 1)
    #[serde(default)]
    pub interval_multiplier: Option<u32>,
}

pub struct PricesTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for PricesTool {
    type Input = PricesInput;

    fn name(&self) -> &'static str {
        GET_PRICES
    }

    fn description(&self) -> &'static str {
        "Get historical OHLCV price bars for a stock ticker over a date range."
    }

    async fn call(&self, input: PricesInput) -> Result<Value> {
        let query = [
            ("ticker", input.ticker.to_uppercase()),
            ("start_date", input.start_date),
            ("end_date", input.end_date),
            ("interval", input.interval.unwrap_or_else(|| "day".to_string())),
            (
                "interval_multiplier",
                input.interval_multiplier.unwrap_or(1).to_string(),
            ),
        ];
        self.api.get_json(GET_PRICES, "/prices", &query).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CryptoTickerInput {
    /// Crypto pair, e.g. "BTC-USD"
    pub ticker: String,
}

pub struct CryptoSnapshotTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for CryptoSnapshotTool {
    type Input = CryptoTickerInput;

    fn name(&self) -> &'static str {
        GET_CRYPTO_PRICE_SNAPSHOT
    }

    fn description(&self) -> &'static str {
        "Get the latest price snapshot for a cryptocurrency pair such as BTC-USD."
    }

    async fn call(&self, input: CryptoTickerInput) -> Result<Value> {
        self.api
            .get_json(
                GET_CRYPTO_PRICE_SNAPSHOT,
                "/crypto/prices/snapshot",
                &[("ticker", input.ticker.to_uppercase())],
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiCredentials;
    use crate::error::AgentError;
    use mockito::Matcher;
    use serde_json::json;
    use std::time::Duration;

    fn registry_for(server: &mockito::ServerGuard) -> ToolRegistry {
        let api = ApiClient::financial_datasets(
            &ApiCredentials {
                base_url: server.url(),
                api_key: "fd-key".to_string(),
            },
            Duration::from_secs(5),
        )
        .unwrap();
        let mut registry = ToolRegistry::new();
        register(&mut registry, api);
        registry
    }

    #[tokio::test]
    async fn test_snapshot_uppercases_ticker() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/prices/snapshot")
            .match_query(Matcher::UrlEncoded("ticker".into(), "NVDA".into()))
            .with_status(200)
            .with_body(r#"{"snapshot":{"ticker":"NVDA","price":121.4}}"#)
            .create_async()
            .await;

        let registry = registry_for(&server);
        let args = json!({"ticker": "nvda"});
        let output = registry
            .execute(GET_PRICE_SNAPSHOT, args.as_object().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();

        assert_eq!(output["snapshot"]["price"], 121.4);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_prices_default_interval() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/prices")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("interval".into(), "day".into()),
                Matcher::UrlEncoded("interval_multiplier".into(), "1".into()),
                Matcher::UrlEncoded("start_date".into(), "2024-01-01".into()),
            ]))
            .with_status(200)
            .with_body(r#"{"prices":[]}"#)
            .create_async()
            .await;

        let registry = registry_for(&server);
        let args = json!({"ticker": "AAPL", "start_date": "2024-01-01", "end_date": "2024-03-31"});
        registry
            .execute(GET_PRICES, args.as_object().unwrap(), Duration::from_secs(5))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_prices_require_date_range() {
        let server = mockito::Server::new_async().await;
        let registry = registry_for(&server);
        let args = json!({"ticker": "AAPL"});
        let err = registry
            .execute(GET_PRICES, args.as_object().unwrap(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolInput { .. }));
    }
}
