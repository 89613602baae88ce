//! Task planner
//!
//! Decomposes a query into an ordered list of subtasks with one structured-output
//! model call. The planner always returns at least one task.

use crate::error::AgentError;
use crate::gateway::{json_schema_for, ModelGateway};
use crate::models::{Task, TaskList};
use crate::Result;
use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const PLANNER_SYSTEM_PROMPT: &str = "You are the planning component of a financial analysis assistant. \
Break the user's question into the smallest ordered list of data-retrieval subtasks needed to answer it. \
Each subtask should be answerable with one or two tool lookups (account, positions, orders, prices, \
financial statements, news). Do not answer the question yourself.";

/// Trait for query decomposition (LLM controlled)
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, query: &str, memory_context: &[String]) -> Result<TaskList>;
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PlanOutput {
    tasks: Vec<PlannedTask>,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct PlannedTask {
    id: u32,
    description: String,
    #[serde(default)]
    done: bool,
}

/// Gateway-backed planner
pub struct TaskPlanner {
    gateway: Arc<ModelGateway>,
}

impl TaskPlanner {
    pub fn new(gateway: Arc<ModelGateway>) -> Self {
        Self { gateway }
    }

    fn build_prompt(query: &str, memory_context: &[String]) -> String {
        let mut prompt = String::new();

        if !memory_context.is_empty() {
            prompt.push_str("Relevant context from previous sessions:\n");
            for snippet in memory_context {
                prompt.push_str("- ");
                prompt.push_str(snippet);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str(&format!(
            r#"QUESTION:
{}

Rules:
- Return the subtasks in execution order
- Number ids from 1
- Every task starts with "done": false
- Keep descriptions short and imperative (e.g. "Retrieve current positions")
"#,
            query
        ));

        prompt
    }

    /// Normalize model output: ids follow position, nothing starts done, blank tasks
    /// are dropped, and an empty plan becomes the query itself.
    fn normalize(query: &str, output: PlanOutput) -> TaskList {
        let tasks: Vec<Task> = output
            .tasks
            .into_iter()
            .filter(|t| !t.description.trim().is_empty())
            .enumerate()
            .map(|(index, t)| {
                if t.done || t.id != index as u32 + 1 {
                    debug!(model_id = t.id, done = t.done, "Renumbering planned task");
                }
                Task::new(index as u32 + 1, t.description.trim())
            })
            .collect();

        if tasks.is_empty() {
            warn!("Planner returned no tasks; using the query as the only task");
            return TaskList::new(vec![Task::new(1, query)]);
        }

        TaskList::new(tasks)
    }
}

#[async_trait]
impl Planner for TaskPlanner {
    async fn plan(&self, query: &str, memory_context: &[String]) -> Result<TaskList> {
        let prompt = Self::build_prompt(query, memory_context);

        let value = self
            .gateway
            .generate_structured(&prompt, Some(PLANNER_SYSTEM_PROMPT), json_schema_for::<PlanOutput>())
            .await
            .map_err(AgentError::planning)?;

        let output: PlanOutput = serde_json::from_value(value).map_err(|e| {
            AgentError::planning(AgentError::LlmError(format!(
                "Plan does not match schema: {}",
                e
            )))
        })?;

        let tasks = Self::normalize(query, output);
        info!(task_count = tasks.len(), "Plan created");
        Ok(tasks)
    }
}
