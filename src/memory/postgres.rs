//! Postgres-backed session memory (sqlx)

use super::{rank, MemoryRecord, SessionMemory};
use crate::error::AgentError;
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::warn;

/// Rows considered per retrieval before ranking
const CANDIDATE_LIMIT: i64 = 200;

pub struct PostgresSessionMemory {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresSessionMemory {
    /// Create the pool without connecting; the first operation opens a connection
    /// and creates the table if needed.
    pub fn connect_lazy(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(database_url)
            .map_err(|e| AgentError::DatabaseError(format!("Invalid database URL: {}", e)))?;

        Ok(Self::from_pool(pool))
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        }
    }

    async fn ensure_schema(&self) -> Result<()> {
        let pool = &self.pool;

        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS session_memory (
                      memory_id UUID PRIMARY KEY,
                      session_id TEXT NOT NULL,
                      content TEXT NOT NULL,
                      metadata TEXT,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_session_memory_session_time
                    ON session_memory (session_id, created_at);
                    "#,
                )
                .execute(pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!(
                    "Failed to initialize session memory schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Vec<MemoryRecord>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT memory_id, session_id, content, metadata, created_at
            FROM session_memory
            WHERE session_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(session_id)
        .bind(CANDIDATE_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AgentError::DatabaseError(format!("Failed to load session memory: {}", e)))?;

        Ok(keep_decoded(session_id, rows.iter().map(decode_row)))
    }

    async fn insert(&self, record: &MemoryRecord) -> Result<()> {
        self.ensure_schema().await?;

        let metadata = record.metadata.as_ref().map(Value::to_string);

        sqlx::query(
            r#"
            INSERT INTO session_memory (memory_id, session_id, content, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.id)
        .bind(&record.session_id)
        .bind(&record.text)
        .bind(metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| AgentError::DatabaseError(format!("Failed to store session memory: {}", e)))?;

        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM session_memory WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                AgentError::DatabaseError(format!("Failed to clear session memory: {}", e))
            })?;

        Ok(())
    }
}

/// Drop rows that failed to decode rather than guessing their id or timestamp.
fn keep_decoded<I, E>(session_id: &str, rows: I) -> Vec<MemoryRecord>
where
    I: IntoIterator<Item = std::result::Result<MemoryRecord, E>>,
    E: std::fmt::Display,
{
    rows.into_iter()
        .filter_map(|row| match row {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(session_id, error = %e, "Skipping undecodable session memory row");
                None
            }
        })
        .collect()
}

fn decode_row(row: &PgRow) -> std::result::Result<MemoryRecord, sqlx::Error> {
    let metadata: Option<String> = row.try_get("metadata")?;
    Ok(MemoryRecord {
        id: row.try_get("memory_id")?,
        session_id: row.try_get("session_id")?,
        text: row.try_get("content")?,
        metadata: metadata.and_then(|m| serde_json::from_str(&m).ok()),
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl SessionMemory for PostgresSessionMemory {
    async fn retrieve(&self, session_id: &str, query: &str, limit: usize) -> Vec<String> {
        match self.load(session_id).await {
            Ok(records) => rank(records, query, limit),
            Err(error) => {
                warn!(session_id, error = %error, "Session memory unavailable; continuing without context");
                Vec::new()
            }
        }
    }

    async fn store(&self, session_id: &str, text: &str, metadata: Option<Value>) -> bool {
        let record = MemoryRecord::new(session_id, text, metadata);
        match self.insert(&record).await {
            Ok(()) => true,
            Err(error) => {
                warn!(session_id, error = %error, "Failed to persist session memory");
                false
            }
        }
    }

    async fn clear(&self, session_id: &str) -> bool {
        match self.delete(session_id).await {
            Ok(()) => true,
            Err(error) => {
                warn!(session_id, error = %error, "Failed to clear session memory");
                false
            }
        }
    }
}
