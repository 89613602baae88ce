//! Startup configuration
//!
//! Built once from `.env` and the process environment, then passed by reference
//! into the gateway, tool providers and agent. Nothing in the core loop reads the
//! environment directly.

use crate::error::AgentError;
use crate::Result;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_FINANCIAL_DATASETS_BASE_URL: &str = "https://api.financialdatasets.ai";
pub const DEFAULT_BROKERAGE_BASE_URL: &str = "https://paper-api.alpaca.markets";

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    /// Per-attempt timeout for a single generate call
    pub timeout: Duration,
    pub max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_base_delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BudgetConfig {
    pub max_steps: u32,
    pub max_steps_per_task: u32,
    /// Optional wall-clock bound for one run; checked at step boundaries
    pub run_deadline: Option<Duration>,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_steps: 20,
            max_steps_per_task: 5,
            run_deadline: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct BrokerageCredentials {
    pub base_url: String,
    pub key_id: String,
    pub secret_key: String,
}

#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub timeout: Duration,
    /// Enables market data, fundamentals and news tools
    pub financial_datasets: Option<ApiCredentials>,
    /// Enables account, positions and orders tools
    pub brokerage: Option<BrokerageCredentials>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            financial_datasets: None,
            brokerage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryBackendKind {
    InMemory,
    Postgres(String),
    Disabled,
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub backend: MemoryBackendKind,
    pub retrieve_limit: usize,
    /// In-memory backend keeps at most this many records per session, newest first
    pub max_records_per_session: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackendKind::InMemory,
            retrieve_limit: 5,
            max_records_per_session: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub model: ModelConfig,
    pub budget: BudgetConfig,
    pub tools: ToolConfig,
    pub memory: MemoryConfig,
    pub transcript_result_max_chars: usize,
    /// Completed runs kept in the audit log before the oldest are evicted
    pub audit_capacity: usize,
    pub api_port: u16,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: ModelConfig::default(),
            budget: BudgetConfig::default(),
            tools: ToolConfig::default(),
            memory: MemoryConfig::default(),
            transcript_result_max_chars: 4000,
            audit_capacity: 1000,
            api_port: 8080,
        }
    }
}

impl AgentConfig {
    /// Load `.env` (if present) and build the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let defaults = AgentConfig::default();

        let model = ModelConfig {
            api_key: get("GEMINI_API_KEY").unwrap_or_default(),
            model: get("GEMINI_MODEL").unwrap_or(defaults.model.model),
            base_url: get("GEMINI_BASE_URL")
                .unwrap_or(defaults.model.base_url)
                .trim_end_matches('/')
                .to_string(),
            timeout: Duration::from_secs(parse_or(&get, "MODEL_TIMEOUT_SECS", 60u64)?),
            max_attempts: parse_or(&get, "MODEL_MAX_ATTEMPTS", defaults.model.max_attempts)?,
            retry_base_delay: Duration::from_millis(parse_or(&get, "MODEL_RETRY_BASE_MS", 500u64)?),
        };

        if model.max_attempts == 0 {
            return Err(AgentError::Config(
                "MODEL_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let run_deadline = match get("AGENT_RUN_DEADLINE_SECS") {
            Some(raw) => Some(Duration::from_secs(parse_value("AGENT_RUN_DEADLINE_SECS", &raw)?)),
            None => None,
        };

        let budget = BudgetConfig {
            max_steps: parse_or(&get, "AGENT_MAX_STEPS", defaults.budget.max_steps)?,
            max_steps_per_task: parse_or(
                &get,
                "AGENT_MAX_STEPS_PER_TASK",
                defaults.budget.max_steps_per_task,
            )?,
            run_deadline,
        };

        let financial_datasets = get("FINANCIAL_DATASETS_API_KEY").map(|api_key| ApiCredentials {
            base_url: get("FINANCIAL_DATASETS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_FINANCIAL_DATASETS_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
        });

        let brokerage = match (get("BROKERAGE_API_KEY_ID"), get("BROKERAGE_API_SECRET_KEY")) {
            (Some(key_id), Some(secret_key)) => Some(BrokerageCredentials {
                base_url: get("BROKERAGE_BASE_URL")
                    .unwrap_or_else(|| DEFAULT_BROKERAGE_BASE_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
                key_id,
                secret_key,
            }),
            _ => None,
        };

        let tools = ToolConfig {
            timeout: Duration::from_secs(parse_or(&get, "TOOL_TIMEOUT_SECS", 30u64)?),
            financial_datasets,
            brokerage,
        };

        let database_url = get("POSTGRES_URL").or_else(|| get("DATABASE_URL"));
        let backend = match get("MEMORY_BACKEND").as_deref().map(str::to_lowercase).as_deref() {
            None | Some("memory") | Some("in-memory") | Some("in_memory") => {
                MemoryBackendKind::InMemory
            }
            Some("disabled") | Some("none") | Some("off") => MemoryBackendKind::Disabled,
            Some("postgres") => match database_url {
                Some(url) => MemoryBackendKind::Postgres(url),
                None => {
                    return Err(AgentError::Config(
                        "MEMORY_BACKEND=postgres requires DATABASE_URL or POSTGRES_URL".to_string(),
                    ))
                }
            },
            Some(other) => {
                return Err(AgentError::Config(format!(
                    "Unknown MEMORY_BACKEND '{}'",
                    other
                )))
            }
        };

        let memory = MemoryConfig {
            backend,
            retrieve_limit: parse_or(&get, "MEMORY_RETRIEVE_LIMIT", defaults.memory.retrieve_limit)?,
            max_records_per_session: parse_or(
                &get,
                "MEMORY_MAX_RECORDS_PER_SESSION",
                defaults.memory.max_records_per_session,
            )?,
        };

        let api_port = match get("PORT").or_else(|| get("API_PORT")) {
            Some(raw) => parse_value("PORT", &raw)?,
            None => defaults.api_port,
        };

        Ok(Self {
            model,
            budget,
            tools,
            memory,
            transcript_result_max_chars: parse_or(
                &get,
                "TRANSCRIPT_RESULT_MAX_CHARS",
                defaults.transcript_result_max_chars,
            )?,
            audit_capacity: parse_or(&get, "AUDIT_MAX_RECORDS", defaults.audit_capacity)?,
            api_port,
        })
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.parse::<T>()
        .map_err(|_| AgentError::Config(format!("{} has invalid value '{}'", key, raw)))
}

fn parse_or<T, G>(get: &G, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AgentConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.budget.max_steps, 20);
        assert_eq!(config.budget.max_steps_per_task, 5);
        assert_eq!(config.budget.run_deadline, None);
        assert_eq!(config.model.max_attempts, 3);
        assert_eq!(config.model.retry_base_delay, Duration::from_millis(500));
        assert_eq!(config.memory.backend, MemoryBackendKind::InMemory);
        assert_eq!(config.memory.max_records_per_session, 200);
        assert_eq!(config.audit_capacity, 1000);
        assert!(config.tools.financial_datasets.is_none());
        assert!(config.tools.brokerage.is_none());
        assert_eq!(config.api_port, 8080);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = config_from(&[
            ("GEMINI_API_KEY", "key"),
            ("AGENT_MAX_STEPS", "7"),
            ("AGENT_MAX_STEPS_PER_TASK", "2"),
            ("AGENT_RUN_DEADLINE_SECS", "90"),
            ("FINANCIAL_DATASETS_API_KEY", "fd-key"),
            ("FINANCIAL_DATASETS_BASE_URL", "http://localhost:9000/"),
            ("BROKERAGE_API_KEY_ID", "id"),
            ("BROKERAGE_API_SECRET_KEY", "secret"),
            ("PORT", "3000"),
            ("MEMORY_MAX_RECORDS_PER_SESSION", "50"),
            ("AUDIT_MAX_RECORDS", "10"),
        ])
        .unwrap();

        assert_eq!(config.model.api_key, "key");
        assert_eq!(config.budget.max_steps, 7);
        assert_eq!(config.budget.max_steps_per_task, 2);
        assert_eq!(config.budget.run_deadline, Some(Duration::from_secs(90)));
        let fd = config.tools.financial_datasets.unwrap();
        assert_eq!(fd.base_url, "http://localhost:9000");
        assert_eq!(fd.api_key, "fd-key");
        assert_eq!(config.tools.brokerage.unwrap().base_url, DEFAULT_BROKERAGE_BASE_URL);
        assert_eq!(config.api_port, 3000);
        assert_eq!(config.memory.max_records_per_session, 50);
        assert_eq!(config.audit_capacity, 10);
    }

    #[test]
    fn test_invalid_number_is_config_error() {
        let err = config_from(&[("AGENT_MAX_STEPS", "many")]).unwrap_err();
        assert!(matches!(err, AgentError::Config(_)));
    }

    #[test]
    fn test_postgres_backend_requires_url() {
        assert!(config_from(&[("MEMORY_BACKEND", "postgres")]).is_err());

        let config = config_from(&[
            ("MEMORY_BACKEND", "postgres"),
            ("DATABASE_URL", "postgres://localhost/agent"),
        ])
        .unwrap();
        assert_eq!(
            config.memory.backend,
            MemoryBackendKind::Postgres("postgres://localhost/agent".to_string())
        );
    }

    #[test]
    fn test_brokerage_needs_both_keys() {
        let config = config_from(&[("BROKERAGE_API_KEY_ID", "id")]).unwrap();
        assert!(config.tools.brokerage.is_none());
    }
}
