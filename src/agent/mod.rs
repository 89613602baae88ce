//! Agent - runs one query end to end
//!
//! MEMORY → PLAN → EXECUTE → SYNTHESIZE → REMEMBER

use crate::audit::{AuditLog, RunRecord};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::execution::TaskExecutor;
use crate::gateway::{GeminiBackend, ModelBackend, ModelGateway};
use crate::memory::{build_session_memory, SessionMemory};
use crate::models::{AgentResponse, QueryRequest};
use crate::planner::{Planner, TaskPlanner};
use crate::synthesis::AnswerSynthesizer;
use crate::tools::{create_default_registry, ToolRegistry};
use crate::Result;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Coordinates planner, executor and synthesizer around session memory and audit.
///
/// The gateway and tool registry are shared read-only; every run owns its own task
/// list and transcript, so one `Agent` can serve concurrent queries.
pub struct Agent {
    planner: Box<dyn Planner>,
    executor: TaskExecutor,
    synthesizer: AnswerSynthesizer,
    memory: Arc<dyn SessionMemory>,
    audit_log: Arc<AuditLog>,
    memory_limit: usize,
}

impl Agent {
    pub fn new(
        planner: Box<dyn Planner>,
        executor: TaskExecutor,
        synthesizer: AnswerSynthesizer,
        memory: Arc<dyn SessionMemory>,
        audit_log: Arc<AuditLog>,
    ) -> Self {
        Self {
            planner,
            executor,
            synthesizer,
            memory,
            audit_log,
            memory_limit: 5,
        }
    }

    pub fn with_memory_limit(mut self, limit: usize) -> Self {
        self.memory_limit = limit;
        self
    }

    /// Wire the pipeline from configuration around an explicit backend and registry.
    pub fn from_parts(
        config: &AgentConfig,
        backend: Arc<dyn ModelBackend>,
        registry: ToolRegistry,
        memory: Arc<dyn SessionMemory>,
    ) -> Self {
        let gateway = Arc::new(ModelGateway::from_config(backend, &config.model));
        let registry = Arc::new(registry);

        let planner = Box::new(TaskPlanner::new(gateway.clone()));
        let executor = TaskExecutor::new(gateway.clone(), registry, config.budget.clone())
            .with_tool_timeout(config.tools.timeout)
            .with_max_result_chars(config.transcript_result_max_chars);
        let synthesizer = AnswerSynthesizer::new(gateway)
            .with_max_result_chars(config.transcript_result_max_chars);

        Self::new(
            planner,
            executor,
            synthesizer,
            memory,
            Arc::new(AuditLog::with_capacity(config.audit_capacity)),
        )
        .with_memory_limit(config.memory.retrieve_limit)
    }

    /// Production wiring: Gemini backend, configured providers and memory backend.
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        if config.model.api_key.is_empty() {
            warn!("GEMINI_API_KEY is not set; model calls will be rejected");
        }
        let backend = Arc::new(GeminiBackend::new(&config.model)?);
        let registry = create_default_registry(config)?;
        let memory = build_session_memory(&config.memory);

        Ok(Self::from_parts(config, backend, registry, memory))
    }

    pub fn audit_log(&self) -> &Arc<AuditLog> {
        &self.audit_log
    }

    pub async fn clear_session(&self, session_id: &str) -> bool {
        info!(session_id, "Clearing session memory");
        self.memory.clear(session_id).await
    }

    /// Answer a query. Planner, executor and gateway failures abort the run; tool
    /// failures only show up as error entries in the transcript.
    pub async fn run(&self, request: QueryRequest) -> Result<AgentResponse> {
        let start_time = Instant::now();
        let query = request.query.trim();
        if query.is_empty() {
            return Err(AgentError::InvalidRequest("query must not be empty".to_string()));
        }

        let run_id = Uuid::new_v4();
        let session_id = request.session_id.as_deref();
        let mut reasoning_trace = Vec::new();

        info!(
            run_id = %run_id,
            session_id = ?session_id,
            query = %query,
            "Agent: starting run"
        );

        reasoning_trace.push("INPUT: Query received".to_string());

        // === MEMORY ===
        let memory_context = match session_id {
            Some(session) => self.memory.retrieve(session, query, self.memory_limit).await,
            None => Vec::new(),
        };
        if !memory_context.is_empty() {
            debug!(snippets = memory_context.len(), "Recalled session memory");
            reasoning_trace.push(format!(
                "MEMORY: {} snippet(s) recalled",
                memory_context.len()
            ));
        }

        // === PLAN ===
        let tasks = self.planner.plan(query, &memory_context).await?;
        reasoning_trace.push(format!("PLAN: {} task(s)", tasks.len()));
        for task in tasks.iter() {
            reasoning_trace.push(format!("PLAN: [{}] {}", task.id, task.description));
        }

        // === EXECUTE ===
        let outcome = self.executor.execute(tasks, query).await?;
        for report in &outcome.reports {
            reasoning_trace.push(format!(
                "EXECUTE: Task {} ({}) - {} after {} step(s){}",
                report.task_id,
                report.description,
                report.outcome,
                report.steps_used,
                if report.fallback_used { ", fallback used" } else { "" }
            ));
        }

        let budget_exhausted = outcome.budget_exhausted();
        if budget_exhausted {
            warn!(
                run_id = %run_id,
                steps_used = outcome.steps_used,
                "Run hit its step budget; answer may be incomplete"
            );
            reasoning_trace.push(
                "BUDGET: Step budget exhausted before every task was confirmed done".to_string(),
            );
        }

        // === SYNTHESIZE ===
        let answer = self
            .synthesizer
            .synthesize(query, &outcome.transcript)
            .await?;
        reasoning_trace.push(format!(
            "COMPLETE: Answer synthesized from {} tool call(s)",
            outcome.transcript.len()
        ));

        // === REMEMBER ===
        if let Some(session) = session_id {
            let stored = self
                .memory
                .store(
                    session,
                    &format!("Q: {} / A: {}", query, answer),
                    Some(json!({ "run_id": run_id })),
                )
                .await;
            if !stored {
                debug!(session_id = session, "Session memory not updated");
            }
        }

        let record = RunRecord::new(
            run_id,
            request.session_id.clone(),
            query.to_string(),
            outcome.tasks.clone(),
            outcome.transcript.clone(),
            answer.clone(),
            reasoning_trace.clone(),
            budget_exhausted,
        );
        self.audit_log.record(record).await?;

        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            steps_used = outcome.steps_used,
            transcript_len = outcome.transcript.len(),
            execution_time_ms,
            "Agent: run complete"
        );

        Ok(AgentResponse {
            run_id,
            answer,
            tasks: outcome.tasks,
            transcript: outcome.transcript,
            task_reports: outcome.reports,
            budget_exhausted,
            reasoning_trace,
            execution_time_ms,
        })
    }

    /// `run(query) -> answer`, as used by batch callers
    pub async fn answer(&self, query: &str) -> Result<String> {
        self.run(QueryRequest::new(query)).await.map(|response| response.answer)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::BudgetConfig;
    use crate::gateway::{BackendError, RequestMode, ScriptedBackend};
    use crate::memory::InMemorySessionMemory;
    use crate::tools::test_support::brokerage_registry;
    use crate::tools::{GET_ACCOUNT, GET_POSITIONS};

    pub(crate) fn scripted_agent(backend: Arc<ScriptedBackend>, max_steps: u32) -> Agent {
        let mut config = AgentConfig::default();
        config.budget = BudgetConfig {
            max_steps,
            max_steps_per_task: 5,
            run_deadline: None,
        };
        Agent::from_parts(
            &config,
            backend,
            brokerage_registry(),
            Arc::new(InMemorySessionMemory::new()),
        )
    }

    fn plan(description: &str) -> serde_json::Value {
        json!({"tasks": [{"id": 1, "description": description, "done": false}]})
    }

    #[tokio::test]
    async fn test_position_lookup() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_structured(plan("Retrieve positions"));
        backend.push_structured(json!({"done": true}));
        backend.push_tool_call(GET_POSITIONS, json!({}));
        backend.push_text("You hold 100 shares of AAPL.");

        let agent = scripted_agent(backend.clone(), 20);
        let response = agent
            .run(QueryRequest::new("show me my positions"))
            .await
            .unwrap();

        assert!(!response.answer.is_empty());
        assert!(response.transcript.contains_tool(GET_POSITIONS));
        assert_eq!(
            response.transcript.entries()[0].result,
            json!([{"symbol": "AAPL", "qty": "100"}])
        );
        assert!(!response.budget_exhausted);
        assert!(response.tasks.all_done());

        let synthesis = backend.requests_in_mode(RequestMode::Text);
        assert_eq!(synthesis.len(), 1);
        assert!(synthesis[0].prompt.contains("get_positions"));
        assert!(synthesis[0].prompt.contains("AAPL"));
    }

    #[tokio::test]
    async fn test_fallback_path() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_structured(plan("Retrieve account info"));
        backend.push_structured(json!({"done": true}));
        backend.push_no_call();
        backend.push_text("Your account PA123 has $2,500 in cash.");

        let response = scripted_agent(backend, 20)
            .run(QueryRequest::new("show account info"))
            .await
            .unwrap();

        assert!(response.transcript.contains_tool(GET_ACCOUNT));
        assert_eq!(response.transcript.len(), 1);
        assert!(response.task_reports[0].fallback_used);
        assert!(!response.answer.is_empty());
    }

    #[tokio::test]
    async fn test_zero_budget_still_answers() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_structured(plan("Retrieve positions"));
        backend.push_text("I could not retrieve any data.");

        let response = scripted_agent(backend.clone(), 0)
            .run(QueryRequest::new("show me my positions"))
            .await
            .unwrap();

        assert!(response.transcript.is_empty());
        assert!(response.budget_exhausted);
        assert!(!response.answer.is_empty());
        assert!(backend.requests_in_mode(RequestMode::ToolCalling).is_empty());
        assert!(response
            .reasoning_trace
            .iter()
            .any(|line| line.starts_with("BUDGET:")));
    }

    #[tokio::test]
    async fn test_session_memory_feeds_next_plan() {
        let backend = Arc::new(ScriptedBackend::new());
        for _ in 0..2 {
            backend.push_structured(plan("Retrieve positions"));
            backend.push_structured(json!({"done": true}));
        }
        backend.push_tool_call(GET_POSITIONS, json!({}));
        backend.push_text("You hold 100 shares of AAPL.");

        let agent = scripted_agent(backend.clone(), 20);
        agent
            .run(QueryRequest::new("show me my positions").with_session("s1"))
            .await
            .unwrap();
        agent
            .run(QueryRequest::new("what are my positions worth").with_session("s1"))
            .await
            .unwrap();

        let plans: Vec<_> = backend
            .requests_in_mode(RequestMode::Structured)
            .into_iter()
            .filter(|r| r.prompt.contains("QUESTION:") && !r.prompt.contains("SUBTASK"))
            .collect();
        assert_eq!(plans.len(), 2);
        assert!(!plans[0].prompt.contains("Relevant context"));
        assert!(plans[1]
            .prompt
            .contains("Q: show me my positions / A: You hold 100 shares of AAPL."));

        assert!(agent.clear_session("s1").await);
    }

    #[tokio::test]
    async fn test_run_is_audited() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_structured(plan("Retrieve positions"));
        backend.push_structured(json!({"done": true}));
        backend.push_tool_call(GET_POSITIONS, json!({}));
        backend.push_text("You hold 100 shares of AAPL.");

        let agent = scripted_agent(backend, 20);
        let response = agent
            .run(QueryRequest::new("show me my positions").with_session("s1"))
            .await
            .unwrap();

        let record = agent.audit_log().get(response.run_id).await.unwrap().unwrap();
        assert_eq!(record.answer, response.answer);
        assert!(agent.audit_log().verify_integrity(response.run_id).await.unwrap());
        assert_eq!(
            agent.audit_log().list_for_session("s1").await.unwrap(),
            vec![response.run_id]
        );
    }

    #[tokio::test]
    async fn test_empty_query_is_rejected() {
        let agent = scripted_agent(Arc::new(ScriptedBackend::new()), 20);
        let err = agent.answer("   ").await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidRequest(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_gateway_fails_without_answer() {
        let backend = Arc::new(ScriptedBackend::new());
        backend.push_structured_error(BackendError::Transient("connection refused".to_string()));

        let agent = scripted_agent(backend.clone(), 20);
        let err = agent.answer("show me my positions").await.unwrap_err();

        assert!(matches!(err, AgentError::PlanningFailed(_)));
        assert!(err.is_gateway_unavailable());
        assert!(backend.requests_in_mode(RequestMode::Text).is_empty());
        assert!(agent.audit_log().is_empty().await);
    }
}
