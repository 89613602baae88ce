//! Task executor
//!
//! Runs each planned task through a bounded select → execute → done-check loop,
//! growing one transcript shared by every task of the query. The model decides which
//! tool to call and when a task is satisfied, but termination is enforced solely by the
//! step budgets (and the optional run deadline).

use crate::config::BudgetConfig;
use crate::error::AgentError;
use crate::gateway::{json_schema_for, parse_json_text, ModelGateway, ModelRequest, ModelResponse, ToolSelection};
use crate::models::{
    ExecutionStatus, Task, TaskList, TaskOutcome, TaskReport, Transcript, TranscriptEntry,
};
use crate::tools::{FallbackCategory, ToolRegistry};
use crate::Result;
use chrono::Utc;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const SELECTION_SYSTEM_PROMPT: &str = "You are the tool-selection component of a financial analysis assistant. \
Pick the single tool call that best advances the current subtask, using the transcript to avoid repeating \
lookups that already succeeded. If no tool fits, do not call any tool.";

const DONE_CHECK_SYSTEM_PROMPT: &str = "You decide whether a subtask of a financial analysis has been satisfied \
by the tool results gathered so far. Answer with done=true only if the transcript already contains the data \
the subtask asks for.";

#[derive(Debug, Deserialize, JsonSchema)]
struct DoneCheck {
    done: bool,
}

/// Everything the executor produced for one query
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub tasks: TaskList,
    pub transcript: Transcript,
    pub reports: Vec<TaskReport>,
    pub steps_used: u32,
}

impl ExecutionOutcome {
    /// True when any task ended without a confirmed done-check.
    pub fn budget_exhausted(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_budget_exhausted())
    }
}

/// Per-query step counters
struct StepBudget {
    global_remaining: u32,
    deadline: Option<Instant>,
    deadline_logged: bool,
}

impl StepBudget {
    fn new(config: &BudgetConfig) -> Self {
        Self {
            global_remaining: config.max_steps,
            deadline: config.run_deadline.map(|d| Instant::now() + d),
            deadline_logged: false,
        }
    }

    /// Global budget or deadline exhausted
    fn exhausted(&mut self) -> bool {
        if self.global_remaining == 0 {
            return true;
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                if !self.deadline_logged {
                    warn!("Run deadline passed; treating remaining work as budget exhausted");
                    self.deadline_logged = true;
                }
                true
            }
            _ => false,
        }
    }
}

pub struct TaskExecutor {
    gateway: Arc<ModelGateway>,
    registry: Arc<ToolRegistry>,
    budget: BudgetConfig,
    tool_timeout: Duration,
    max_result_chars: usize,
}

impl TaskExecutor {
    pub fn new(gateway: Arc<ModelGateway>, registry: Arc<ToolRegistry>, budget: BudgetConfig) -> Self {
        Self {
            gateway,
            registry,
            budget,
            tool_timeout: Duration::from_secs(30),
            max_result_chars: 4000,
        }
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_max_result_chars(mut self, max_chars: usize) -> Self {
        self.max_result_chars = max_chars;
        self
    }

    pub fn budget(&self) -> &BudgetConfig {
        &self.budget
    }

    /// Run every task in order. Gateway failures abort the run with `ExecutionFailed`;
    /// tool failures are recorded in the transcript and the loop continues.
    pub async fn execute(&self, mut tasks: TaskList, query: &str) -> Result<ExecutionOutcome> {
        let mut transcript = Transcript::new();
        let mut reports = Vec::with_capacity(tasks.len());
        let mut budget = StepBudget::new(&self.budget);
        let mut steps_used = 0;

        debug!(
            task_count = tasks.len(),
            max_steps = self.budget.max_steps,
            max_steps_per_task = self.budget.max_steps_per_task,
            "Starting task execution"
        );

        for index in 0..tasks.len() {
            let task = tasks.tasks()[index].clone();

            if budget.exhausted() {
                warn!(
                    task_id = task.id,
                    task = %task.description,
                    "Global step budget exhausted; skipping task"
                );
                tasks.mark_done(index);
                reports.push(TaskReport {
                    task_id: task.id,
                    description: task.description,
                    outcome: TaskOutcome::Skipped,
                    steps_used: 0,
                    fallback_used: false,
                });
                continue;
            }

            let report = self
                .run_task(&task, query, &mut transcript, &mut budget)
                .await?;
            steps_used += report.steps_used;

            if report.outcome.is_budget_exhausted() {
                warn!(
                    task_id = task.id,
                    steps_used = report.steps_used,
                    transcript_len = transcript.len(),
                    "Task step budget exhausted; marking done without confirmation"
                );
            } else {
                info!(task_id = task.id, steps_used = report.steps_used, "Task done");
            }

            tasks.mark_done(index);
            reports.push(report);
        }

        Ok(ExecutionOutcome {
            tasks,
            transcript,
            reports,
            steps_used,
        })
    }

    async fn run_task(
        &self,
        task: &Task,
        query: &str,
        transcript: &mut Transcript,
        budget: &mut StepBudget,
    ) -> Result<TaskReport> {
        let mut task_remaining = self.budget.max_steps_per_task;
        let mut steps = 0;
        let mut fallback_used = false;

        let outcome = loop {
            if task_remaining == 0 || budget.exhausted() {
                break TaskOutcome::BudgetExhausted;
            }
            task_remaining -= 1;
            budget.global_remaining -= 1;
            steps += 1;

            // Tool selection
            let prompt = self.selection_prompt(query, task, transcript);
            let selection = self
                .gateway
                .select_tool(&prompt, Some(SELECTION_SYSTEM_PROMPT), self.registry.declarations())
                .await
                .map_err(AgentError::execution)?;

            let entry = match selection {
                ToolSelection::Call(call) => {
                    self.run_tool(task, steps, call.name, call.arguments, false)
                        .await
                }
                ToolSelection::NoCall => {
                    fallback_used = true;
                    match self.registry.fallback_for(&task.description) {
                        Some(name) => {
                            info!(task_id = task.id, tool_name = name, "No tool selected; using fallback");
                            self.run_tool(task, steps, name.to_string(), Map::new(), true)
                                .await
                        }
                        None => {
                            let name = FallbackCategory::infer(&task.description).tool_name();
                            warn!(task_id = task.id, tool_name = name, "No fallback tool registered");
                            failed_entry(
                                task,
                                steps,
                                name.to_string(),
                                Map::new(),
                                true,
                                format!("Fallback tool '{}' is not available", name),
                            )
                        }
                    }
                }
            };
            transcript.append(entry);

            // Done check
            if self.check_done(query, task, transcript).await? {
                break TaskOutcome::Done;
            }
        };

        Ok(TaskReport {
            task_id: task.id,
            description: task.description.clone(),
            outcome,
            steps_used: steps,
            fallback_used,
        })
    }

    async fn run_tool(
        &self,
        task: &Task,
        step: u32,
        tool_name: String,
        arguments: Map<String, Value>,
        fallback: bool,
    ) -> TranscriptEntry {
        let start = std::time::Instant::now();
        debug!(task_id = task.id, step, tool_name = %tool_name, "Executing tool");

        match self
            .registry
            .execute(&tool_name, &arguments, self.tool_timeout)
            .await
        {
            Ok(result) => TranscriptEntry {
                task_id: task.id,
                step,
                tool_name,
                input_arguments: arguments,
                result,
                status: ExecutionStatus::Success,
                fallback,
                execution_time_ms: start.elapsed().as_millis() as u64,
                created_at: Utc::now(),
            },
            Err(e) => {
                warn!(task_id = task.id, tool_name = %tool_name, error = %e, "Tool execution failed");
                let mut entry = failed_entry(task, step, tool_name, arguments, fallback, e);
                entry.execution_time_ms = start.elapsed().as_millis() as u64;
                entry
            }
        }
    }

    /// Ask the model whether the task is satisfied. Unparseable answers count as not done.
    async fn check_done(&self, query: &str, task: &Task, transcript: &Transcript) -> Result<bool> {
        let prompt = format!(
            "QUESTION:\n{}\n\nSUBTASK:\n{}\n\nTRANSCRIPT:\n{}\nIs the subtask satisfied?",
            query,
            task.description,
            transcript.render(self.max_result_chars)
        );
        let request = ModelRequest::new(prompt)
            .with_system_prompt(DONE_CHECK_SYSTEM_PROMPT)
            .with_output_schema(json_schema_for::<DoneCheck>());

        let response = self
            .gateway
            .invoke(request)
            .await
            .map_err(AgentError::execution)?;

        let value = match response {
            ModelResponse::Structured(value) => Some(value),
            ModelResponse::Text(text) => parse_json_text(&text).ok(),
            ModelResponse::ToolCalls(_) => None,
        };

        match value.and_then(|v| serde_json::from_value::<DoneCheck>(v).ok()) {
            Some(check) => Ok(check.done),
            None => {
                warn!(task_id = task.id, "Malformed done-check response; treating as not done");
                Ok(false)
            }
        }
    }

    fn selection_prompt(&self, query: &str, task: &Task, transcript: &Transcript) -> String {
        format!(
            "QUESTION:\n{}\n\nCURRENT SUBTASK ({}):\n{}\n\nTRANSCRIPT SO FAR:\n{}",
            query,
            task.id,
            task.description,
            transcript.render(self.max_result_chars)
        )
    }
}

fn failed_entry(
    task: &Task,
    step: u32,
    tool_name: String,
    arguments: Map<String, Value>,
    fallback: bool,
    error: impl std::fmt::Display,
) -> TranscriptEntry {
    TranscriptEntry {
        task_id: task.id,
        step,
        tool_name,
        input_arguments: arguments,
        result: TranscriptEntry::error_marker(error),
        status: ExecutionStatus::Failed,
        fallback,
        execution_time_ms: 0,
        created_at: Utc::now(),
    }
}
