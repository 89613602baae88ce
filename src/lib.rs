//! Financial Analysis Agent
//!
//! A conversational financial/crypto analysis assistant that:
//! - Decomposes a question into ordered subtasks (planner)
//! - Selects and runs data-retrieval tools per subtask under step budgets (executor)
//! - Synthesizes a final answer from the shared tool transcript (synthesizer)
//! - Routes every model call through one retrying gateway
//! - Remembers sessions and audits every run
//!
//! LOOP:
//! QUERY → PLAN → (SELECT TOOL → EXECUTE → DONE?)* per task → SYNTHESIZE → ANSWER

pub mod agent;
pub mod api;
pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod memory;
pub mod models;
pub mod planner;
pub mod synthesis;
pub mod tools;

pub use error::{AgentError, Result};

// Re-export common types
pub use agent::Agent;
pub use config::AgentConfig;
pub use models::*;
