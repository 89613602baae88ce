//! Session memory
//!
//! Optional cross-session context consulted before planning and updated after
//! answering. Every operation is best-effort: backend failures are logged and degrade
//! to "no memory" instead of failing the query.

use crate::config::{MemoryBackendKind, MemoryConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

pub mod in_memory;
pub mod postgres;

pub use in_memory::InMemorySessionMemory;
pub use postgres::PostgresSessionMemory;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryRecord {
    pub id: Uuid,
    pub session_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

impl MemoryRecord {
    pub fn new(session_id: &str, text: &str, metadata: Option<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            text: text.to_string(),
            metadata,
            created_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait SessionMemory: Send + Sync {
    /// Most relevant snippets for `query`, at most `limit`.
    async fn retrieve(&self, session_id: &str, query: &str, limit: usize) -> Vec<String>;

    async fn store(&self, session_id: &str, text: &str, metadata: Option<Value>) -> bool;

    async fn clear(&self, session_id: &str) -> bool;
}

/// Memory turned off: nothing is kept, nothing is returned.
pub struct DisabledMemory;

#[async_trait]
impl SessionMemory for DisabledMemory {
    async fn retrieve(&self, _session_id: &str, _query: &str, _limit: usize) -> Vec<String> {
        Vec::new()
    }

    async fn store(&self, _session_id: &str, _text: &str, _metadata: Option<Value>) -> bool {
        false
    }

    async fn clear(&self, _session_id: &str) -> bool {
        true
    }
}

/// Build the configured backend, falling back to in-memory storage when the
/// Postgres pool cannot be created.
pub fn build_session_memory(config: &MemoryConfig) -> Arc<dyn SessionMemory> {
    match &config.backend {
        MemoryBackendKind::Disabled => {
            info!("Session memory backend: disabled");
            Arc::new(DisabledMemory)
        }
        MemoryBackendKind::InMemory => {
            info!("Session memory backend: in-memory");
            Arc::new(InMemorySessionMemory::with_max_records(config.max_records_per_session))
        }
        MemoryBackendKind::Postgres(url) => match PostgresSessionMemory::connect_lazy(url) {
            Ok(memory) => {
                info!("Session memory backend: postgres");
                Arc::new(memory)
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres memory backend, falling back to in-memory: {}",
                    error
                );
                Arc::new(InMemorySessionMemory::with_max_records(
                    config.max_records_per_session,
                ))
            }
        },
    }
}

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "how", "with", "this", "that", "from", "show",
    "you", "your", "about", "have", "does", "did",
];

fn keywords(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3)
        .map(str::to_lowercase)
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Rank records by keyword overlap with the query, newest first on ties.
pub(crate) fn rank(records: Vec<MemoryRecord>, query: &str, limit: usize) -> Vec<String> {
    let query_words = keywords(query);

    let mut scored: Vec<(usize, MemoryRecord)> = records
        .into_iter()
        .map(|record| {
            let overlap = keywords(&record.text).intersection(&query_words).count();
            (overlap, record)
        })
        .collect();

    scored.sort_by(|(a_score, a), (b_score, b)| {
        b_score
            .cmp(a_score)
            .then_with(|| b.created_at.cmp(&a.created_at))
    });

    scored
        .into_iter()
        .take(limit)
        .map(|(_, record)| record.text)
        .collect()
}
