//! Gemini backend for the model gateway
//!
//! Speaks the `generateContent` REST API: system instruction, JSON-schema
//! constrained output, and function declarations for tool calling.
//! Uses a long-lived reqwest::Client for connection pooling.

use super::{
    parse_json_text, BackendError, ModelBackend, ModelRequest, ModelResponse, RequestMode,
    ToolCallRequest,
};
use crate::config::ModelConfig;
use crate::Result;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, error, warn};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Reusable Gemini client (connection-pooled)
pub struct GeminiBackend {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiBackend {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

fn build_request(request: &ModelRequest) -> GeminiRequest {
    let mut generation_config = GenerationConfig {
        temperature: 0.2,
        top_p: 0.9,
        max_output_tokens: 2048,
        response_mime_type: None,
        response_json_schema: None,
    };

    if let Some(schema) = &request.output_schema {
        generation_config.response_mime_type = Some("application/json".to_string());
        generation_config.response_json_schema = Some(schema.clone());
    }

    let (tools, tool_config) = match &request.tools {
        Some(declarations) if !declarations.is_empty() => (
            Some(vec![GeminiTools {
                function_declarations: declarations
                    .iter()
                    .map(|d| FunctionDeclaration {
                        name: d.name.clone(),
                        description: d.description.clone(),
                        parameters_json_schema: d.parameters.clone(),
                    })
                    .collect(),
            }]),
            Some(ToolConfig {
                function_calling_config: FunctionCallingConfig {
                    mode: "AUTO".to_string(),
                },
            }),
        ),
        _ => (None, None),
    };

    GeminiRequest {
        contents: vec![Content {
            role: Some("user".to_string()),
            parts: vec![Part {
                text: Some(request.prompt.clone()),
                function_call: None,
            }],
        }],
        system_instruction: request.system_prompt.as_ref().map(|text| SystemInstruction {
            parts: vec![Part {
                text: Some(text.clone()),
                function_call: None,
            }],
        }),
        generation_config,
        tools,
        tool_config,
    }
}

fn parse_response(
    mode: RequestMode,
    response: GeminiResponse,
) -> std::result::Result<ModelResponse, BackendError> {
    let candidate = response
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| BackendError::InvalidResponse("No candidates in response".to_string()))?;

    let parts = candidate.content.map(|c| c.parts).unwrap_or_default();

    let mut text = String::new();
    let mut calls = Vec::new();

    for part in parts {
        if let Some(call) = part.function_call {
            let arguments = match call.args {
                Some(Value::Object(map)) => map,
                _ => Map::new(),
            };
            calls.push(ToolCallRequest {
                name: call.name,
                arguments,
            });
        } else if let Some(t) = part.text {
            text.push_str(&t);
        }
    }

    match mode {
        RequestMode::ToolCalling => {
            if calls.is_empty() {
                Ok(ModelResponse::Text(text))
            } else {
                Ok(ModelResponse::ToolCalls(calls))
            }
        }
        // Unparseable output is handed back as text; callers decide what it means.
        RequestMode::Structured => match parse_json_text(&text) {
            Ok(value) => Ok(ModelResponse::Structured(value)),
            Err(_) => {
                warn!(
                    finish_reason = candidate.finish_reason.as_deref().unwrap_or("unknown"),
                    "Gemini structured output did not parse as JSON"
                );
                Ok(ModelResponse::Text(text))
            }
        },
        RequestMode::Text => {
            if text.trim().is_empty() {
                warn!(
                    finish_reason = candidate.finish_reason.as_deref().unwrap_or("unknown"),
                    "Empty text response from Gemini"
                );
            }
            Ok(ModelResponse::Text(text))
        }
    }
}

fn classify_send_error(e: reqwest::Error) -> BackendError {
    let e = e.without_url();
    if e.is_connect() || e.is_timeout() {
        BackendError::Transient(format!("Gemini API unreachable: {}", e))
    } else {
        BackendError::Rejected(format!("Gemini API error: {}", e))
    }
}

fn classify_status(status: StatusCode, body: String) -> BackendError {
    match status {
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            BackendError::Transient(format!("Gemini API returned {}: {}", status, body))
        }
        _ => BackendError::Rejected(format!("Gemini API returned {}: {}", status, body)),
    }
}

#[async_trait]
impl ModelBackend for GeminiBackend {
    async fn generate(
        &self,
        request: &ModelRequest,
    ) -> std::result::Result<ModelResponse, BackendError> {
        if self.api_key.is_empty() {
            return Err(BackendError::Rejected(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let body = build_request(request);
        let mode = request.mode();

        debug!(model = %self.model, ?mode, "Calling Gemini API");

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(classify_send_error)
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                e
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!(%status, "Gemini API error response: {}", error_text);
            return Err(classify_status(status, error_text));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            let e = e.without_url();
            error!("Failed to parse Gemini response: {}", e);
            BackendError::InvalidResponse(format!("Gemini parse error: {}", e))
        })?;

        if let Some(usage) = &gemini_response.usage_metadata {
            debug!(
                prompt_tokens = usage.prompt_token_count,
                candidate_tokens = usage.candidates_token_count,
                "Gemini response received"
            );
        }

        parse_response(mode, gemini_response)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<SystemInstruction>,
    generation_config: GenerationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTools>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_config: Option<ToolConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Serialize, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    max_output_tokens: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_json_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTools {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FunctionDeclaration {
    name: String,
    description: String,
    parameters_json_schema: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
struct FunctionCallingConfig {
    mode: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<Content>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: i32,
    #[serde(default)]
    candidates_token_count: i32,
}
