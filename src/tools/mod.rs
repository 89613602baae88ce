//! Tool trait and registry
//!
//! Tools are named, schema-validated data-retrieval capabilities. Each tool
//! declares a typed input struct; the registry decodes the model's arguments into
//! that struct before the tool runs, so a bad argument set never reaches a provider.

use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::gateway::{json_schema_for, ToolDeclaration};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub mod brokerage;
pub mod fundamentals;
pub mod http;
pub mod market_data;
pub mod news;

pub const GET_ACCOUNT: &str = "get_account";
pub const GET_POSITIONS: &str = "get_positions";
pub const GET_ORDERS: &str = "get_orders";

/// Object-safe tool interface used by the registry and executor
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_schema(&self) -> Value;
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value>;
}

/// A tool with a typed, self-describing input
#[async_trait]
pub trait TypedTool: Send + Sync + 'static {
    type Input: DeserializeOwned + JsonSchema + Send;

    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    async fn call(&self, input: Self::Input) -> Result<Value>;
}

/// Input for tools that take no arguments
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct NoArgs {}

struct Validated<T>(T);

#[async_trait]
impl<T: TypedTool> Tool for Validated<T> {
    fn name(&self) -> &'static str {
        self.0.name()
    }

    fn description(&self) -> &'static str {
        self.0.description()
    }

    fn input_schema(&self) -> Value {
        json_schema_for::<T::Input>()
    }

    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let input = decode_input::<T::Input>(self.0.name(), args)?;
        self.0.call(input).await
    }
}

/// Decode raw model arguments into a tool's input type.
pub fn decode_input<T: DeserializeOwned>(tool: &str, args: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone())).map_err(|e| AgentError::InvalidToolInput {
        tool: tool.to_string(),
        message: e.to_string(),
    })
}

//
// ================= Registry =================
//

/// Tool registry for looking up and executing tools. Read-only once built.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    pub fn register<T: TypedTool>(&mut self, tool: T) {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            warn!(tool_name = %name, "Replacing already registered tool");
        }
        self.tools.insert(name, Arc::new(Validated(tool)));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Declarations for binding every registered tool to a model request.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .values()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.input_schema(),
            })
            .collect()
    }

    /// Validate arguments and run a tool under a timeout.
    pub async fn execute(
        &self,
        name: &str,
        args: &Map<String, Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentError::ToolNotFound(name.to_string()))?;

        match tokio::time::timeout(timeout, tool.invoke(args)).await {
            Ok(result) => result,
            Err(_) => Err(AgentError::tool(
                name,
                format!("timed out after {} ms", timeout.as_millis()),
            )),
        }
    }

    /// Deterministic default tool for a task description, if one is registered.
    pub fn fallback_for(&self, task_description: &str) -> Option<&'static str> {
        let category = FallbackCategory::infer(task_description);
        [category.tool_name(), GET_ACCOUNT]
            .into_iter()
            .find(|name| self.contains(name))
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//
// ================= Fallback Routing =================
//

/// Coarse task category used when tool selection yields no call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackCategory {
    Positions,
    Orders,
    Account,
}

impl FallbackCategory {
    pub fn infer(description: &str) -> Self {
        let lowered = description.to_lowercase();
        let has_any = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));

        if has_any(&["position", "holding", "portfolio", "shares i own"]) {
            FallbackCategory::Positions
        } else if has_any(&["order", "trade", "fill", "execution"]) {
            FallbackCategory::Orders
        } else {
            FallbackCategory::Account
        }
    }

    pub fn tool_name(&self) -> &'static str {
        match self {
            FallbackCategory::Positions => GET_POSITIONS,
            FallbackCategory::Orders => GET_ORDERS,
            FallbackCategory::Account => GET_ACCOUNT,
        }
    }
}

/// Create a registry with every provider enabled by the configuration.
pub fn create_default_registry(config: &AgentConfig) -> Result<ToolRegistry> {
    let mut registry = ToolRegistry::new();

    if let Some(credentials) = &config.tools.brokerage {
        brokerage::register(&mut registry, credentials, config.tools.timeout)?;
    }

    if let Some(credentials) = &config.tools.financial_datasets {
        let api = http::ApiClient::financial_datasets(credentials, config.tools.timeout)?;
        market_data::register(&mut registry, api.clone());
        fundamentals::register(&mut registry, api.clone());
        news::register(&mut registry, api);
    }

    if registry.is_empty() {
        warn!("No data providers configured; the agent will answer without tool data");
    } else {
        info!(tools = ?registry.names(), "Tool registry assembled");
    }

    Ok(registry)
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-process tools for loop tests.

    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Returns a fixed payload and counts its invocations.
    pub struct StaticTool {
        pub name: &'static str,
        pub output: Value,
        pub calls: Arc<AtomicU32>,
    }

    impl StaticTool {
        pub fn new(name: &'static str, output: Value) -> Self {
            Self {
                name,
                output,
                calls: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl TypedTool for StaticTool {
        type Input = NoArgs;

        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "Returns a fixed payload"
        }

        async fn call(&self, _input: NoArgs) -> Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.output.clone())
        }
    }

    /// Always fails like an upstream HTTP error.
    pub struct FailingTool;

    #[async_trait]
    impl TypedTool for FailingTool {
        type Input = NoArgs;

        fn name(&self) -> &'static str {
            "get_news"
        }

        fn description(&self) -> &'static str {
            "Always fails"
        }

        async fn call(&self, _input: NoArgs) -> Result<Value> {
            Err(AgentError::tool("get_news", "upstream returned 500"))
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    pub struct TickerInput {
        pub ticker: String,
    }

    /// Requires a `ticker` argument and echoes it back.
    pub struct QuoteTool;

    #[async_trait]
    impl TypedTool for QuoteTool {
        type Input = TickerInput;

        fn name(&self) -> &'static str {
            "get_price_snapshot"
        }

        fn description(&self) -> &'static str {
            "Latest price for a ticker"
        }

        async fn call(&self, input: TickerInput) -> Result<Value> {
            Ok(json!({ "ticker": input.ticker, "price": 187.5 }))
        }
    }

    pub fn brokerage_registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(StaticTool::new(
            GET_POSITIONS,
            json!([{ "symbol": "AAPL", "qty": "100" }]),
        ));
        registry.register(StaticTool::new(
            GET_ACCOUNT,
            json!({ "account_number": "PA123", "cash": "2500.00" }),
        ));
        registry.register(QuoteTool);
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[tokio::test]
    async fn test_execute_registered_tool() {
        let registry = brokerage_registry();
        let output = registry
            .execute(GET_POSITIONS, &Map::new(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(output[0]["symbol"], "AAPL");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = brokerage_registry();
        let err = registry
            .execute("get_weather", &Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::ToolNotFound(_)));
    }

    #[tokio::test]
    async fn test_arguments_are_validated_before_call() {
        let registry = brokerage_registry();

        let err = registry
            .execute("get_price_snapshot", &args(json!({"ticker": 42})), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::InvalidToolInput { .. }));

        let output = registry
            .execute(
                "get_price_snapshot",
                &args(json!({"ticker": "MSFT"})),
                Duration::from_secs(1),
            )
            .await
            .unwrap();
        assert_eq!(output["ticker"], "MSFT");
    }

    #[test]
    fn test_declarations_carry_schemas() {
        let registry = brokerage_registry();
        let declarations = registry.declarations();
        assert_eq!(declarations.len(), 3);

        let quote = declarations
            .iter()
            .find(|d| d.name == "get_price_snapshot")
            .unwrap();
        assert_eq!(quote.parameters["required"], json!(["ticker"]));
    }

    #[test]
    fn test_fallback_category_inference() {
        assert_eq!(
            FallbackCategory::infer("Retrieve current positions"),
            FallbackCategory::Positions
        );
        assert_eq!(
            FallbackCategory::infer("List my open orders"),
            FallbackCategory::Orders
        );
        assert_eq!(
            FallbackCategory::infer("Retrieve account info"),
            FallbackCategory::Account
        );
    }

    #[test]
    fn test_fallback_for_prefers_registered_tools() {
        let registry = brokerage_registry();
        assert_eq!(registry.fallback_for("Retrieve positions"), Some(GET_POSITIONS));
        // get_orders is not registered here, so account info is used
        assert_eq!(registry.fallback_for("Show recent orders"), Some(GET_ACCOUNT));
        assert_eq!(ToolRegistry::new().fallback_for("anything"), None);
    }
}
