//! Model invocation gateway
//!
//! Every generative call goes through `ModelGateway`: one request, optionally
//! constrained to a JSON schema or bound to a set of callable tools. The gateway owns
//! per-attempt timeouts and retry with exponential backoff for transient failures.

use crate::config::ModelConfig;
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

pub mod gemini;
pub mod scripted;

pub use gemini::GeminiBackend;
pub use scripted::ScriptedBackend;

//
// ================= Request / Response =================
//

/// A callable tool as advertised to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A tool call chosen by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMode {
    Text,
    Structured,
    ToolCalling,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelRequest {
    pub prompt: String,
    pub system_prompt: Option<String>,
    pub output_schema: Option<Value>,
    pub tools: Option<Vec<ToolDeclaration>>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn mode(&self) -> RequestMode {
        if self.tools.is_some() {
            RequestMode::ToolCalling
        } else if self.output_schema.is_some() {
            RequestMode::Structured
        } else {
            RequestMode::Text
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelResponse {
    Text(String),
    Structured(Value),
    ToolCalls(Vec<ToolCallRequest>),
}

/// Outcome of a tool-selection round
#[derive(Debug, Clone, PartialEq)]
pub enum ToolSelection {
    Call(ToolCallRequest),
    NoCall,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    /// Connectivity failure or timeout; eligible for retry
    #[error("transient backend failure: {0}")]
    Transient(String),

    #[error("backend rejected request: {0}")]
    Rejected(String),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl BackendError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BackendError::Transient(_))
    }
}

/// A text-generation backend (one HTTP round trip per call)
#[async_trait]
pub trait ModelBackend: Send + Sync {
    async fn generate(
        &self,
        request: &ModelRequest,
    ) -> std::result::Result<ModelResponse, BackendError>;
}

//
// ================= Retry Policy =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts in total, including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

//
// ================= Gateway =================
//

/// Process-wide, read-only after construction; safe to share between concurrent runs.
pub struct ModelGateway {
    backend: Arc<dyn ModelBackend>,
    retry: RetryPolicy,
    timeout: Duration,
}

impl ModelGateway {
    pub fn new(backend: Arc<dyn ModelBackend>, retry: RetryPolicy, timeout: Duration) -> Self {
        Self {
            backend,
            retry,
            timeout,
        }
    }

    pub fn from_config(backend: Arc<dyn ModelBackend>, config: &ModelConfig) -> Self {
        Self::new(
            backend,
            RetryPolicy {
                max_attempts: config.max_attempts.max(1),
                base_delay: config.retry_base_delay,
            },
            config.timeout,
        )
    }

    /// Issue one model request, retrying transient failures.
    ///
    /// Setting both an output schema and tools is a caller error.
    pub async fn invoke(&self, request: ModelRequest) -> Result<ModelResponse> {
        if request.output_schema.is_some() && request.tools.is_some() {
            return Err(AgentError::InvalidRequest(
                "output_schema and tools cannot both be set".to_string(),
            ));
        }

        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!(attempt, mode = ?request.mode(), "Invoking model backend");

            let outcome = match tokio::time::timeout(self.timeout, self.backend.generate(&request)).await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(BackendError::Transient(format!(
                    "request timed out after {} ms",
                    self.timeout.as_millis()
                ))),
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(BackendError::Transient(message)) => {
                    if attempt >= max_attempts {
                        error!(attempts = attempt, error = %message, "Model backend unavailable");
                        return Err(AgentError::GatewayUnavailable {
                            attempts: attempt,
                            message,
                        });
                    }

                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Transient model failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(other) => {
                    error!(attempt, error = %other, "Model backend failed");
                    return Err(AgentError::LlmError(other.to_string()));
                }
            }
        }
    }

    /// Free-text generation
    pub async fn generate_text(&self, prompt: &str, system_prompt: Option<&str>) -> Result<String> {
        let mut request = ModelRequest::new(prompt);
        request.system_prompt = system_prompt.map(str::to_string);

        match self.invoke(request).await? {
            ModelResponse::Text(text) => Ok(text),
            ModelResponse::Structured(value) => Ok(value.to_string()),
            ModelResponse::ToolCalls(_) => Err(AgentError::LlmError(
                "Expected text, model returned a tool call".to_string(),
            )),
        }
    }

    /// Schema-constrained generation; returns the raw JSON value for the caller to decode.
    pub async fn generate_structured(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        schema: Value,
    ) -> Result<Value> {
        let mut request = ModelRequest::new(prompt).with_output_schema(schema);
        request.system_prompt = system_prompt.map(str::to_string);

        match self.invoke(request).await? {
            ModelResponse::Structured(value) => Ok(value),
            ModelResponse::Text(text) => parse_json_text(&text),
            ModelResponse::ToolCalls(_) => Err(AgentError::LlmError(
                "Expected structured output, model returned a tool call".to_string(),
            )),
        }
    }

    /// Ask the model to pick at most one tool. Only the first call of a multi-call
    /// response is honored.
    pub async fn select_tool(
        &self,
        prompt: &str,
        system_prompt: Option<&str>,
        tools: Vec<ToolDeclaration>,
    ) -> Result<ToolSelection> {
        let mut request = ModelRequest::new(prompt).with_tools(tools);
        request.system_prompt = system_prompt.map(str::to_string);

        match self.invoke(request).await? {
            ModelResponse::ToolCalls(calls) => {
                if calls.len() > 1 {
                    warn!(
                        call_count = calls.len(),
                        honored = %calls[0].name,
                        "Model returned multiple tool calls; only the first is executed"
                    );
                }
                Ok(calls
                    .into_iter()
                    .next()
                    .map(ToolSelection::Call)
                    .unwrap_or(ToolSelection::NoCall))
            }
            ModelResponse::Text(_) | ModelResponse::Structured(_) => Ok(ToolSelection::NoCall),
        }
    }
}

/// Parse JSON from model text, tolerating a ```json fence around it.
pub(crate) fn parse_json_text(response: &str) -> Result<Value> {
    let cleaned = response
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    serde_json::from_str(cleaned).map_err(|e| {
        AgentError::LlmError(format!(
            "Failed to parse structured model response: {} | raw={}",
            e, response
        ))
    })
}

/// JSON Schema for `T`, inlined and without the `$schema` marker, as model backends expect.
pub fn json_schema_for<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|settings| {
            settings.inline_subschemas = true;
            settings.option_add_null_type = false;
        })
        .into_generator();
    let root = generator.into_root_schema_for::<T>();

    let mut value = serde_json::to_value(root).unwrap_or_else(|_| Value::Object(Map::new()));
    if let Some(obj) = value.as_object_mut() {
        obj.remove("$schema");
        obj.remove("definitions");
    }
    value
}
