//! Core data models for the analysis agent

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

//
// ================= Tasks =================
//

/// One subtask of a decomposed query. Its position in the plan is its execution order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: u32,
    pub description: String,
    #[serde(default)]
    pub done: bool,
}

impl Task {
    pub fn new(id: u32, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
            done: false,
        }
    }
}

/// Ordered plan produced once per query. Only the `done` flags change after creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TaskList {
    tasks: Vec<Task>,
}

impl TaskList {
    pub fn new(tasks: Vec<Task>) -> Self {
        Self { tasks }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter()
    }

    pub fn all_done(&self) -> bool {
        self.tasks.iter().all(|t| t.done)
    }

    pub(crate) fn mark_done(&mut self, index: usize) {
        if let Some(task) = self.tasks.get_mut(index) {
            task.done = true;
        }
    }
}

//
// ================= Transcript =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Success,
    Failed,
}

/// Record of one tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TranscriptEntry {
    pub task_id: u32,
    pub step: u32,
    pub tool_name: String,
    pub input_arguments: Map<String, Value>,
    /// Tool output, or `{"error": "..."}` when the invocation failed.
    pub result: Value,
    pub status: ExecutionStatus,
    /// Set when the entry came from the fallback path rather than a model-selected call.
    #[serde(default)]
    pub fallback: bool,
    pub execution_time_ms: u64,
    pub created_at: DateTime<Utc>,
}

impl TranscriptEntry {
    pub fn error_marker(message: impl fmt::Display) -> Value {
        serde_json::json!({ "error": message.to_string() })
    }

    pub fn is_error(&self) -> bool {
        self.status == ExecutionStatus::Failed
    }
}

/// Session-wide, append-only log of tool invocations for one query.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Transcript {
    entries: Vec<TranscriptEntry>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&mut self, entry: TranscriptEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_tool(&self, tool_name: &str) -> bool {
        self.entries.iter().any(|e| e.tool_name == tool_name)
    }

    /// Render the transcript for inclusion in a prompt.
    ///
    /// Each result is cut to `max_result_chars` characters. The output depends only on
    /// the entries and the limit, so repeated renders of the same transcript are identical.
    pub fn render(&self, max_result_chars: usize) -> String {
        if self.entries.is_empty() {
            return "(no tool calls yet)".to_string();
        }

        let mut out = String::new();
        for (i, entry) in self.entries.iter().enumerate() {
            let args = Value::Object(entry.input_arguments.clone());
            let status = match entry.status {
                ExecutionStatus::Success => "ok",
                ExecutionStatus::Failed => "error",
            };
            out.push_str(&format!(
                "[{}] {}({}) task={} status={}\n",
                i + 1,
                entry.tool_name,
                args,
                entry.task_id,
                status
            ));
            out.push_str(&truncate_chars(&entry.result.to_string(), max_result_chars));
            out.push_str("\n\n");
        }
        out
    }
}

pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("... [truncated]");
    cut
}

//
// ================= Execution Reports =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskOutcome {
    /// The done-check confirmed the task.
    Done,
    /// The per-task or global step budget (or the run deadline) ran out.
    BudgetExhausted,
    /// The global budget was already spent before the task started.
    Skipped,
}

impl TaskOutcome {
    pub fn is_budget_exhausted(&self) -> bool {
        !matches!(self, TaskOutcome::Done)
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskOutcome::Done => "done",
            TaskOutcome::BudgetExhausted => "budget exhausted",
            TaskOutcome::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskReport {
    pub task_id: u32,
    pub description: String,
    pub outcome: TaskOutcome,
    pub steps_used: u32,
    pub fallback_used: bool,
}

//
// ================= Agent I/O =================
//

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            session_id: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub run_id: Uuid,
    pub answer: String,
    pub tasks: TaskList,
    pub transcript: Transcript,
    pub task_reports: Vec<TaskReport>,
    /// True when any task ended on a budget or deadline rather than a confirmed done-check.
    pub budget_exhausted: bool,
    pub reasoning_trace: Vec<String>,
    pub execution_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(tool: &str, result: Value) -> TranscriptEntry {
        TranscriptEntry {
            task_id: 1,
            step: 1,
            tool_name: tool.to_string(),
            input_arguments: Map::new(),
            result,
            status: ExecutionStatus::Success,
            fallback: false,
            execution_time_ms: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_task_list_serializes_as_array() {
        let list = TaskList::new(vec![Task::new(1, "Retrieve positions")]);
        let json = serde_json::to_value(&list).unwrap();
        assert_eq!(
            json,
            json!([{ "id": 1, "description": "Retrieve positions", "done": false }])
        );
    }

    #[test]
    fn test_mark_done_flips_only_target() {
        let mut list = TaskList::new(vec![Task::new(1, "a"), Task::new(2, "b")]);
        list.mark_done(1);
        assert!(!list.tasks()[0].done);
        assert!(list.tasks()[1].done);
        assert!(!list.all_done());
    }

    #[test]
    fn test_render_includes_tool_and_result() {
        let mut transcript = Transcript::new();
        transcript.append(entry("get_positions", json!([{"symbol": "AAPL", "qty": "100"}])));

        let rendered = transcript.render(4000);
        assert!(rendered.contains("get_positions"));
        assert!(rendered.contains("AAPL"));
        assert_eq!(rendered, transcript.render(4000));
    }

    #[test]
    fn test_render_truncates_long_results() {
        let mut transcript = Transcript::new();
        transcript.append(entry("get_news", json!("x".repeat(100))));

        let rendered = transcript.render(10);
        assert!(rendered.contains("[truncated]"));
        assert!(!rendered.contains(&"x".repeat(50)));
    }

    #[test]
    fn test_empty_transcript_render() {
        assert_eq!(Transcript::new().render(100), "(no tool calls yet)");
    }

    #[test]
    fn test_error_marker_shape() {
        assert_eq!(
            TranscriptEntry::error_marker("HTTP 500"),
            json!({ "error": "HTTP 500" })
        );
    }
}
