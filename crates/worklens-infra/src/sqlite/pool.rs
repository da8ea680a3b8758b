//! Split reader/writer pools over the chat database.
//!
//! SQLite serializes writers, so a single write connection loses nothing,
//! while WAL mode lets reads proceed alongside it. Checkpoint saves during a
//! running turn go through `writer`; listing and history endpoints read
//! concurrently through `reader`.

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Reader/writer pool pair for the chat database.
#[derive(Clone)]
pub struct DatabasePool {
    /// Read-only connections for SELECTs.
    pub reader: SqlitePool,
    /// The one write connection.
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Open both pools and bring the schema up to date.
    ///
    /// Migrations run on the writer before the reader opens; the reader is
    /// read-only and would fail to create the file on first launch.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(base_opts.clone())
            .await?;

        sqlx::migrate!("../../migrations").run(&writer).await?;

        // One user, a handful of concurrent requests; matches the activity
        // store's connection count.
        let reader = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(base_opts.read_only(true))
            .await?;

        Ok(Self { reader, writer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pool_creates_tables() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        // Verify tables exist by querying sqlite_master
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name != '_sqlx_migrations' ORDER BY name",
        )
        .fetch_all(&pool.reader)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"checkpoints"), "checkpoints table missing");
        assert!(table_names.contains(&"chat_meta"), "chat_meta table missing");
        assert!(table_names.contains(&"chat_feedback"), "chat_feedback table missing");
    }

    #[tokio::test]
    async fn test_pool_wal_mode() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_wal.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let result: (String,) =
            sqlx::query_as("PRAGMA journal_mode")
                .fetch_one(&pool.writer)
                .await
                .unwrap();

        assert_eq!(result.0.to_lowercase(), "wal");
    }

    #[tokio::test]
    async fn test_pool_foreign_keys_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_fk.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let result: (i32,) =
            sqlx::query_as("PRAGMA foreign_keys")
                .fetch_one(&pool.writer)
                .await
                .unwrap();

        assert_eq!(result.0, 1, "foreign keys should be enabled");
    }

    #[tokio::test]
    async fn test_reader_pool_rejects_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test_ro.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let pool = DatabasePool::new(&url).await.unwrap();

        let result = sqlx::query("INSERT INTO chat_meta (thread_id, title, last_activity) VALUES ('1', NULL, '2026-01-01T00:00:00Z')")
            .execute(&pool.reader)
            .await;

        assert!(result.is_err());
    }
}
