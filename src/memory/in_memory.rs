//! Process-local session memory

use super::{rank, MemoryRecord, SessionMemory};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

const DEFAULT_MAX_RECORDS: usize = 200;

/// Records per session are capped; the oldest are dropped first.
pub struct InMemorySessionMemory {
    sessions: Arc<RwLock<HashMap<String, VecDeque<MemoryRecord>>>>,
    max_records: usize,
}

impl InMemorySessionMemory {
    pub fn new() -> Self {
        Self::with_max_records(DEFAULT_MAX_RECORDS)
    }

    pub fn with_max_records(max_records: usize) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            max_records: max_records.max(1),
        }
    }
}

impl Default for InMemorySessionMemory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionMemory for InMemorySessionMemory {
    async fn retrieve(&self, session_id: &str, query: &str, limit: usize) -> Vec<String> {
        let records = {
            let sessions = self.sessions.read().await;
            sessions
                .get(session_id)
                .map(|records| records.iter().cloned().collect())
                .unwrap_or_default()
        };
        rank(records, query, limit)
    }

    async fn store(&self, session_id: &str, text: &str, metadata: Option<Value>) -> bool {
        let mut sessions = self.sessions.write().await;
        let records = sessions.entry(session_id.to_string()).or_default();
        records.push_back(MemoryRecord::new(session_id, text, metadata));
        while records.len() > self.max_records {
            records.pop_front();
        }
        true
    }

    async fn clear(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        sessions.remove(session_id);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let memory = InMemorySessionMemory::new();
        memory
            .store("alice", "Q: my positions / A: 100 AAPL", Some(json!({"run": 1})))
            .await;
        memory.store("bob", "Q: my positions / A: 5 TSLA", None).await;

        let recalled = memory.retrieve("alice", "positions", 5).await;
        assert_eq!(recalled, vec!["Q: my positions / A: 100 AAPL"]);
        assert!(memory.retrieve("carol", "positions", 5).await.is_empty());
    }

    #[tokio::test]
    async fn test_limit_and_clear() {
        let memory = InMemorySessionMemory::new();
        for i in 0..4 {
            memory.store("s1", &format!("note {}", i), None).await;
        }

        assert_eq!(memory.retrieve("s1", "note", 2).await.len(), 2);
        assert!(memory.clear("s1").await);
        assert!(memory.retrieve("s1", "note", 2).await.is_empty());
    }

    #[tokio::test]
    async fn test_oldest_records_are_dropped_past_cap() {
        let memory = InMemorySessionMemory::with_max_records(3);
        for i in 0..5 {
            memory.store("s1", &format!("note {}", i), None).await;
        }

        let mut recalled = memory.retrieve("s1", "note", 10).await;
        recalled.sort();
        assert_eq!(recalled, vec!["note 2", "note 3", "note 4"]);

        memory.store("s2", "note other", None).await;
        assert_eq!(memory.retrieve("s1", "note", 10).await.len(), 3);
    }
}
