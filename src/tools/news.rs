//! Company news tool

use super::http::{push_opt, ApiClient};
use super::{ToolRegistry, TypedTool};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

pub const GET_NEWS: &str = "get_news";

const DEFAULT_LIMIT: u32 = 5;

pub fn register(registry: &mut ToolRegistry, api: ApiClient) {
    registry.register(NewsTool { api });
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct NewsInput {
    /// Stock ticker symbol, e.g. "AAPL"
    pub ticker: String,
    /// Only articles published on or after this date, YYYY-MM-DD
    #[serde(default)]
    pub start_date: Option<String>,
    /// Only articles published on or before this date, YYYY-MM-DD
    #[serde(default)]
    pub end_date: Option<String>,
    /// Maximum number of articles (default 5)
    #[serde(default)]
    pub limit: Option<u32>,
}

pub struct NewsTool {
    api: ApiClient,
}

#[async_trait]
impl TypedTool for NewsTool {
    type Input = NewsInput;

    fn name(&self) -> &'static str {
        GET_NEWS
    }

    fn description(&self) -> &'static str {
        "Get recent news articles about a company (title, source, date, url)."
    }

    async fn call(&self, input: NewsInput) -> Result<Value> {
        let mut query = vec![
            ("ticker", input.ticker.to_uppercase()),
            ("limit", input.limit.unwrap_or(DEFAULT_LIMIT).to_string()),
        ];
        push_opt(&mut query, "start_date", &input.start_date);
        push_opt(&mut query, "end_date", &input.end_date);
        self.api.get_json(GET_NEWS, "/news", &query).await
    }
}
