//! Brokerage account tools (account, positions, orders)

use super::http::{push_opt, ApiClient};
use super::{NoArgs, ToolRegistry, TypedTool, GET_ACCOUNT, GET_ORDERS, GET_POSITIONS};
use crate::config::BrokerageCredentials;
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

pub fn register(
    registry: &mut ToolRegistry,
    credentials: &BrokerageCredentials,
    timeout: Duration,
) -> Result<()> {
    let api = ApiClient::brokerage(credentials, timeout)?;
    registry.register(GetAccountTool { api: api.clone() });
    registry.register(GetPositionsTool { api: api.clone() });
    registry.register(GetOrdersTool { api });
    Ok(())
}

pub struct GetAccountTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for GetAccountTool {
    type Input = NoArgs;

    fn name(&self) -> &'static str {
        GET_ACCOUNT
    }

    fn description(&self) -> &'static str {
        "Get the brokerage account summary: account status, cash, buying power, equity and portfolio value."
    }

    async fn call(&self, _input: NoArgs) -> Result<Value> {
        self.api.get_json(GET_ACCOUNT, "/v2/account", &[]).await
    }
}

pub struct GetPositionsTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for GetPositionsTool {
    type Input = NoArgs;

    fn name(&self) -> &'static str {
        GET_POSITIONS
    }

    fn description(&self) -> &'static str {
        "List all open positions (holdings) in the brokerage account with quantity, market value and unrealized P/L."
    }

    async fn call(&self, _input: NoArgs) -> Result<Value> {
        self.api.get_json(GET_POSITIONS, "/v2/positions", &[]).await
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetOrdersInput {
    /// Order status filter: "open", "closed" or "all"
    #[serde(default)]
    pub status: Option<String>,
    /// Maximum number of orders to return
    #[serde(default)]
    pub limit: Option<u32>,
    /// Comma-separated list of symbols to filter by
    #[serde(default)]
    pub symbols: Option<String>,
}

pub struct GetOrdersTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for GetOrdersTool {
    type Input = GetOrdersInput;

    fn name(&self) -> &'static str {
        GET_ORDERS
    }

    fn description(&self) -> &'static str {
        "List orders (trades) in the brokerage account, optionally filtered by status and symbols."
    }

    async fn call(&self, input: GetOrdersInput) -> Result<Value> {
        let mut query = Vec::new();
        push_opt(&mut query, "status", &input.status);
        push_opt(&mut query, "limit", &input.limit);
        push_opt(&mut query, "symbols", &input.symbols);
        self.api.get_json(GET_ORDERS, "/v2/orders", &query).await
    }
}
