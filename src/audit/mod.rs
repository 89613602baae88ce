//! Audit logging for completed runs
//!
//! Every answered query leaves a `RunRecord` keyed by run id, with a SHA-256 hash of
//! its transcript so a stored record can be checked for tampering.

use crate::models::{TaskList, Transcript};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: Uuid,
    pub session_id: Option<String>,
    pub query: String,
    pub tasks: TaskList,
    pub transcript: Transcript,
    pub answer: String,
    pub reasoning_trace: Vec<String>,
    pub budget_exhausted: bool,
    pub transcript_hash: String,
    pub created_at: DateTime<Utc>,
}

impl RunRecord {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        run_id: Uuid,
        session_id: Option<String>,
        query: String,
        tasks: TaskList,
        transcript: Transcript,
        answer: String,
        reasoning_trace: Vec<String>,
        budget_exhausted: bool,
    ) -> Self {
        let transcript_hash = compute_transcript_hash(&transcript);
        Self {
            run_id,
            session_id,
            query,
            tasks,
            transcript,
            answer,
            reasoning_trace,
            budget_exhausted,
            transcript_hash,
            created_at: Utc::now(),
        }
    }
}

const DEFAULT_CAPACITY: usize = 1000;

#[derive(Default)]
struct Records {
    by_id: HashMap<Uuid, RunRecord>,
    /// Insertion order, oldest at the front
    order: VecDeque<Uuid>,
}

/// Audit trail storage, bounded to `capacity` runs with oldest-first eviction
pub struct AuditLog {
    records: Arc<RwLock<Records>>,
    capacity: usize,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(Records::default())),
            capacity: capacity.max(1),
        }
    }

    /// Store a run record
    pub async fn record(&self, record: RunRecord) -> Result<Uuid> {
        let run_id = record.run_id;
        let mut records = self.records.write().await;

        if records.by_id.insert(run_id, record).is_none() {
            records.order.push_back(run_id);
        }
        while records.order.len() > self.capacity {
            if let Some(evicted) = records.order.pop_front() {
                records.by_id.remove(&evicted);
                debug!(run_id = %evicted, "Evicted oldest audit record");
            }
        }

        Ok(run_id)
    }

    pub async fn get(&self, run_id: Uuid) -> Result<Option<RunRecord>> {
        let records = self.records.read().await;
        Ok(records.by_id.get(&run_id).cloned())
    }

    /// Run ids for a session, oldest first
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<Uuid>> {
        let records = self.records.read().await;

        let mut items: Vec<_> = records
            .by_id
            .values()
            .filter(|record| record.session_id.as_deref() == Some(session_id))
            .map(|record| (record.run_id, record.created_at))
            .collect();

        items.sort_by_key(|(_, created_at)| *created_at);

        Ok(items.into_iter().map(|(id, _)| id).collect())
    }

    /// Recompute the transcript hash of a stored record. Unknown ids verify as false.
    pub async fn verify_integrity(&self, run_id: Uuid) -> Result<bool> {
        let records = self.records.read().await;

        match records.by_id.get(&run_id) {
            Some(record) => Ok(compute_transcript_hash(&record.transcript) == record.transcript_hash),
            None => Ok(false),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.by_id.is_empty()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA-256 of the serialized transcript, hex encoded.
/// Streams JSON directly into the hasher.
pub fn compute_transcript_hash(transcript: &Transcript) -> String {
    let mut hasher = Sha256::new();

    if serde_json::to_writer(&mut HashWriter(&mut hasher), transcript).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
