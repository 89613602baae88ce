//! Deterministic model backend
//!
//! Replays scripted responses per request mode (text, structured, tool calling).
//! When a lane has one item left, that item repeats forever, so a single scripted
//! `{"done": false}` behaves as an oracle that never declares a task complete.
//! Every request is recorded for inspection.

use super::{BackendError, ModelBackend, ModelRequest, ModelResponse, RequestMode, ToolCallRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Mutex;

type Scripted = std::result::Result<ModelResponse, BackendError>;

#[derive(Default)]
struct Lanes {
    text: VecDeque<Scripted>,
    structured: VecDeque<Scripted>,
    tools: VecDeque<Scripted>,
}

#[derive(Default)]
pub struct ScriptedBackend {
    lanes: Mutex<Lanes>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, mode: RequestMode, response: Scripted) {
        let mut lanes = self.lanes.lock().unwrap_or_else(|p| p.into_inner());
        let lane = match mode {
            RequestMode::Text => &mut lanes.text,
            RequestMode::Structured => &mut lanes.structured,
            RequestMode::ToolCalling => &mut lanes.tools,
        };
        lane.push_back(response);
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(RequestMode::Text, Ok(ModelResponse::Text(text.into())));
    }

    pub fn push_text_error(&self, error: BackendError) {
        self.push(RequestMode::Text, Err(error));
    }

    pub fn push_structured(&self, value: Value) {
        self.push(RequestMode::Structured, Ok(ModelResponse::Structured(value)));
    }

    /// Structured lane answered with raw text, as some backends do.
    pub fn push_structured_text(&self, text: impl Into<String>) {
        self.push(RequestMode::Structured, Ok(ModelResponse::Text(text.into())));
    }

    pub fn push_structured_error(&self, error: BackendError) {
        self.push(RequestMode::Structured, Err(error));
    }

    pub fn push_tool_calls(&self, calls: Vec<ToolCallRequest>) {
        self.push(RequestMode::ToolCalling, Ok(ModelResponse::ToolCalls(calls)));
    }

    pub fn push_tool_call(&self, name: impl Into<String>, arguments: Value) {
        let arguments = match arguments {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        self.push_tool_calls(vec![ToolCallRequest {
            name: name.into(),
            arguments,
        }]);
    }

    pub fn push_no_call(&self) {
        self.push_tool_calls(Vec::new());
    }

    pub fn push_tool_text(&self, text: impl Into<String>) {
        self.push(RequestMode::ToolCalling, Ok(ModelResponse::Text(text.into())));
    }

    pub fn push_tool_error(&self, error: BackendError) {
        self.push(RequestMode::ToolCalling, Err(error));
    }

    /// All requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn requests_in_mode(&self, mode: RequestMode) -> Vec<ModelRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.mode() == mode)
            .collect()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    async fn generate(&self, request: &ModelRequest) -> Scripted {
        self.requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(request.clone());

        let mut lanes = self.lanes.lock().unwrap_or_else(|p| p.into_inner());
        let mode = request.mode();
        let lane = match mode {
            RequestMode::Text => &mut lanes.text,
            RequestMode::Structured => &mut lanes.structured,
            RequestMode::ToolCalling => &mut lanes.tools,
        };

        match lane.len() {
            0 => Err(BackendError::Rejected(format!(
                "no scripted response for {:?} request",
                mode
            ))),
            1 => lane.front().cloned().unwrap_or_else(|| {
                Err(BackendError::Rejected("scripted lane drained".to_string()))
            }),
            _ => lane.pop_front().unwrap_or_else(|| {
                Err(BackendError::Rejected("scripted lane drained".to_string()))
            }),
        }
    }
}
