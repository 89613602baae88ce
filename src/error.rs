//! Error types for the financial analysis agent

use thiserror::Error;

/// Result type alias for agent operations
pub type Result<T> = std::result::Result<T, AgentError>;

#[derive(Error, Debug)]
pub enum AgentError {

    // =============================
    // Fatal Pipeline Errors
    // =============================

    #[error("Planning failed: {0}")]
    PlanningFailed(#[source] Box<AgentError>),

    #[error("Execution failed: {0}")]
    ExecutionFailed(#[source] Box<AgentError>),

    #[error("Model gateway unavailable after {attempts} attempt(s): {message}")]
    GatewayUnavailable { attempts: u32, message: String },

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // =============================
    // Tool Errors (downgraded to transcript data)
    // =============================

    #[error("Tool '{tool}' failed: {message}")]
    ToolExecutionError { tool: String, message: String },

    #[error("Invalid input for tool '{tool}': {message}")]
    InvalidToolInput { tool: String, message: String },

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    // =============================
    // Ambient Errors
    // =============================

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl AgentError {
    pub fn planning(cause: AgentError) -> Self {
        AgentError::PlanningFailed(Box::new(cause))
    }

    pub fn execution(cause: AgentError) -> Self {
        AgentError::ExecutionFailed(Box::new(cause))
    }

    pub fn tool(tool: impl Into<String>, message: impl Into<String>) -> Self {
        AgentError::ToolExecutionError {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// True when this error, or the cause it wraps, is a terminal gateway failure.
    pub fn is_gateway_unavailable(&self) -> bool {
        match self {
            AgentError::GatewayUnavailable { .. } => true,
            AgentError::PlanningFailed(inner) | AgentError::ExecutionFailed(inner) => {
                inner.is_gateway_unavailable()
            }
            _ => false,
        }
    }

    /// Tool-level failures are recorded in the transcript instead of aborting the run.
    pub fn is_tool_failure(&self) -> bool {
        matches!(
            self,
            AgentError::ToolExecutionError { .. }
                | AgentError::InvalidToolInput { .. }
                | AgentError::ToolNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_unavailable_is_visible_through_wrappers() {
        let err = AgentError::planning(AgentError::GatewayUnavailable {
            attempts: 3,
            message: "connection refused".to_string(),
        });
        assert!(err.is_gateway_unavailable());
        assert!(err.to_string().starts_with("Planning failed"));

        let err = AgentError::execution(AgentError::LlmError("bad schema".to_string()));
        assert!(!err.is_gateway_unavailable());
    }

    #[test]
    fn test_tool_failures_are_classified() {
        assert!(AgentError::tool("get_news", "HTTP 500").is_tool_failure());
        assert!(AgentError::ToolNotFound("nope".into()).is_tool_failure());
        assert!(!AgentError::LlmError("x".into()).is_tool_failure());
    }
}
