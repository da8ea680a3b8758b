//! SQLite checkpoint repository implementation.
//!
//! Implements `CheckpointRepository` from `worklens-core`. Snapshots are
//! stored as JSON text; the `id` column is the per-thread ordering key the
//! trait contract requires, assigned by SQLite on insert and never reused.

use chrono::{DateTime, Utc};
use sqlx::Row;

use worklens_core::repository::CheckpointRepository;
use worklens_types::checkpoint::{Checkpoint, NewCheckpoint};
use worklens_types::error::RepositoryError;
use worklens_types::state::TurnState;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `CheckpointRepository`.
pub struct SqliteCheckpointRepository {
    pool: DatabasePool,
}

impl SqliteCheckpointRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct CheckpointRow {
    id: i64,
    thread_id: String,
    node: String,
    state: String,
    created_at: String,
}

impl CheckpointRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            thread_id: row.try_get("thread_id")?,
            node: row.try_get("node")?,
            state: row.try_get("state")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_checkpoint(self) -> Result<Checkpoint, RepositoryError> {
        let state: TurnState = serde_json::from_str(&self.state)
            .map_err(|e| RepositoryError::Query(format!("invalid checkpoint state: {e}")))?;
        let created_at = parse_datetime(&self.created_at)?;

        Ok(Checkpoint {
            id: self.id,
            thread_id: self.thread_id,
            node: self.node,
            state,
            created_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

// ---------------------------------------------------------------------------
// CheckpointRepository implementation
// ---------------------------------------------------------------------------

impl CheckpointRepository for SqliteCheckpointRepository {
    async fn save(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
        let created_at = Utc::now();
        let state_json = serde_json::to_string(&checkpoint.state)
            .map_err(|e| RepositoryError::Query(format!("serialize checkpoint state: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO checkpoints (thread_id, node, state, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&checkpoint.thread_id)
        .bind(&checkpoint.node)
        .bind(&state_json)
        .bind(format_datetime(&created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(Checkpoint {
            id: result.last_insert_rowid(),
            thread_id: checkpoint.thread_id.clone(),
            node: checkpoint.node.clone(),
            state: checkpoint.state.clone(),
            created_at,
        })
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, thread_id, node, state, created_at FROM checkpoints
             WHERE thread_id = ? ORDER BY id DESC LIMIT 1",
        )
        .bind(thread_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let cp_row = CheckpointRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(cp_row.into_checkpoint()?))
            }
            None => Ok(None),
        }
    }

    async fn delete_thread(&self, thread_id: &str) -> Result<(), RepositoryError> {
        // Not an error when the thread has no checkpoints yet.
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}
