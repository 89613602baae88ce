//! Shared HTTP client for data-provider tools

use crate::config::{ApiCredentials, BrokerageCredentials};
use crate::error::AgentError;
use crate::Result;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Authenticated JSON client bound to one provider base URL.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str, headers: HeaderMap, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(timeout)
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Client for the market data, fundamentals and news provider (`X-API-KEY`).
    pub fn financial_datasets(credentials: &ApiCredentials, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "x-api-key", &credentials.api_key)?;
        Self::new(&credentials.base_url, headers, timeout)
    }

    /// Client for the brokerage account provider.
    pub fn brokerage(credentials: &BrokerageCredentials, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        insert_header(&mut headers, "apca-api-key-id", &credentials.key_id)?;
        insert_header(&mut headers, "apca-api-secret-key", &credentials.secret_key)?;
        Self::new(&credentials.base_url, headers, timeout)
    }

    /// GET `path` with query parameters; non-2xx responses become tool errors.
    pub async fn get_json(&self, tool: &str, path: &str, query: &[(&str, String)]) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(tool, %url, "Calling data provider");

        let response = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| AgentError::tool(tool, format!("request to {} failed: {}", path, e)))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            AgentError::tool(tool, format!("failed to read response from {}: {}", path, e))
        })?;

        if !status.is_success() {
            return Err(AgentError::tool(
                tool,
                format!("{} returned {}: {}", path, status, body),
            ));
        }

        serde_json::from_str(&body)
            .map_err(|e| AgentError::tool(tool, format!("invalid JSON from {}: {}", path, e)))
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: &str) -> Result<()> {
    let mut value = HeaderValue::from_str(value)
        .map_err(|_| AgentError::Config(format!("{} contains invalid characters", name)))?;
    value.set_sensitive(true);
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

/// Optional query parameter helper.
pub(crate) fn push_opt<T: ToString>(query: &mut Vec<(&'static str, String)>, key: &'static str, value: &Option<T>) {
    if let Some(value) = value {
        query.push((key, value.to_string()));
    }
}
