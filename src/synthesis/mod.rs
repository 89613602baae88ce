//! Answer synthesis
//!
//! One free-text model call over the query and the full transcript. The prompt is a
//! pure function of its inputs.

use crate::gateway::ModelGateway;
use crate::models::Transcript;
use crate::Result;
use std::sync::Arc;
use tracing::{debug, warn};

pub const NO_DATA_ANSWER: &str =
    "I wasn't able to retrieve enough data to answer this question. Please try rephrasing it or ask about a specific account, ticker or period.";

const SYNTHESIS_SYSTEM_PROMPT: &str = "You are a financial analysis assistant. Answer the user's question \
using only the tool results provided. Cite concrete figures, note when a lookup failed or data is missing, \
and do not invent numbers.";

pub struct AnswerSynthesizer {
    gateway: Arc<ModelGateway>,
    max_result_chars: usize,
}

impl AnswerSynthesizer {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self {
            gateway,
            max_result_chars: 4000,
        }
    }

    pub fn with_max_result_chars(mut self, max_chars: usize) -> Self {
        self.max_result_chars = max_chars;
        self
    }

    pub fn build_prompt(&self, query: &str, transcript: &Transcript) -> String {
        let data = if transcript.is_empty() {
            "(no data was retrieved; say so and suggest what the user could ask instead)".to_string()
        } else {
            transcript.render(self.max_result_chars)
        };

        format!(
            "QUESTION:\n{}\n\nTOOL RESULTS:\n{}\nWrite the final answer.",
            query, data
        )
    }

    /// Produce the final answer. Gateway failures propagate; a blank reply becomes a
    /// fixed no-data message.
    pub async fn synthesize(&self, query: &str, transcript: &Transcript) -> Result<String> {
        let prompt = self.build_prompt(query, transcript);
        debug!(transcript_len = transcript.len(), "Synthesizing answer");

        let answer = self
            .gateway
            .generate_text(&prompt, Some(SYNTHESIS_SYSTEM_PROMPT))
            .await?;

        let answer = answer.trim();
        if answer.is_empty() {
            warn!("Model returned an empty answer; using no-data message");
            return Ok(NO_DATA_ANSWER.to_string());
        }

        Ok(answer.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::gateway::{BackendError, RequestMode, RetryPolicy, ScriptedBackend};
    use crate::models::{ExecutionStatus, TranscriptEntry};
    use chrono::Utc;
    use serde_json::{json, Map};
    use std::time::Duration;

    fn synthesizer(backend: Arc<ScriptedBackend>) -> AnswerSynthesizer {
        let gateway = ModelGateway::new(backend, RetryPolicy::default(), Duration::from_secs(5));
        AnswerSynthesizer::new(Arc::new(gateway))
    }

    fn positions_transcript() -> Transcript {
        let mut transcript = Transcript::new();
        transcript.append(TranscriptEntry {
            task_id: 1,
            step: 1,
            tool_name: "get_positions".to_string(),
            input_arguments: Map::new(),
            result: json!([{"symbol": "AAPL", "qty": "100"}]),
            status: ExecutionStatus::Success,
            fallback: false,
            execution_time_ms: 3,
            created_at: Utc::now(),
        });
        transcript
    }

    #[tokio::test]
    async fn test_same_inputs_give_same_prompt() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_text("You hold 100 shares of AAPL.");

        let synthesizer = synthesizer(backend.clone());
        let transcript = positions_transcript();

        let first = synthesizer.synthesize("show me my positions", &transcript).await.unwrap();
        let second = synthesizer.synthesize("show me my positions", &transcript).await.unwrap();

        assert_eq!(first, second);
        let requests = backend.requests_in_mode(RequestMode::Text);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0], requests[1]);
        assert!(requests[0].prompt.contains("get_positions"));
        assert!(requests[0].prompt.contains("AAPL"));
    }

    #[tokio::test]
    async fn test_empty_transcript_still_answers() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_text("   ");

        let answer = synthesizer(backend)
            .synthesize("show me my positions", &Transcript::new())
            .await
            .unwrap();

        assert_eq!(answer, NO_DATA_ANSWER);
    }

    #[tokio::test]
    async fn test_blank_gemini_reply_gives_no_data_answer() {
        use crate::config::ModelConfig;
        use crate::gateway::GeminiBackend;

        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", mockito::Matcher::Any)
            .with_status(200)
            .with_body(
                json!({"candidates": [{
                    "content": {"parts": [{"text": "  "}]},
                    "finishReason": "SAFETY"
                }]})
                .to_string(),
            )
            .create_async()
            .await;

        let backend = GeminiBackend::new(&ModelConfig {
            api_key: "test-key".to_string(),
            base_url: server.url(),
            ..ModelConfig::default()
        })
        .unwrap();
        let gateway = ModelGateway::new(Arc::new(backend), RetryPolicy::default(), Duration::from_secs(5));

        let answer = AnswerSynthesizer::new(Arc::new(gateway))
            .synthesize("show me my positions", &Transcript::new())
            .await
            .unwrap();

        assert_eq!(answer, NO_DATA_ANSWER);
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_text_error(BackendError::Rejected("quota exceeded".to_string()));

        let err = synthesizer(backend)
            .synthesize("q", &positions_transcript())
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::LlmError(_)));
    }
}
