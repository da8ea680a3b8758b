//! SQLite chat metadata repository implementation.
//!
//! Implements `ChatRepository` from `worklens-core` using sqlx with split
//! read/write pools. Follows the same patterns as
//! `SqliteCheckpointRepository`: raw queries, private Row structs, writer
//! pool for mutations.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use worklens_core::repository::ChatRepository;
use worklens_types::checkpoint::{ChatFeedback, ChatMeta};
use worklens_types::error::RepositoryError;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ChatRepository`.
pub struct SqliteChatRepository {
    pool: DatabasePool,
}

impl SqliteChatRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Private Row type for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct ChatMetaRow {
    thread_id: String,
    title: Option<String>,
    last_activity: String,
}

impl ChatMetaRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            thread_id: row.try_get("thread_id")?,
            title: row.try_get("title")?,
            last_activity: row.try_get("last_activity")?,
        })
    }

    fn into_meta(self) -> Result<ChatMeta, RepositoryError> {
        let last_activity = parse_datetime(&self.last_activity)?;

        Ok(ChatMeta {
            thread_id: self.thread_id,
            title: self.title,
            last_activity,
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
// ChatRepository implementation
// ---------------------------------------------------------------------------

impl ChatRepository for SqliteChatRepository {
    async fn upsert(&self, meta: &ChatMeta) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO chat_meta (thread_id, title, last_activity)
               VALUES (?, ?, ?)
               ON CONFLICT(thread_id) DO UPDATE SET
                   title = excluded.title,
                   last_activity = excluded.last_activity"#,
        )
        .bind(&meta.thread_id)
        .bind(&meta.title)
        .bind(format_datetime(&meta.last_activity))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, thread_id: &str) -> Result<Option<ChatMeta>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM chat_meta WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let meta_row = ChatMetaRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(meta_row.into_meta()?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ChatMeta>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM chat_meta ORDER BY last_activity DESC")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut metas = Vec::with_capacity(rows.len());
        for row in &rows {
            let meta_row = ChatMetaRow::from_row(row)
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            metas.push(meta_row.into_meta()?);
        }

        Ok(metas)
    }

    async fn set_title(&self, thread_id: &str, title: &str) -> Result<(), RepositoryError> {
        let result = sqlx::query("UPDATE chat_meta SET title = ? WHERE thread_id = ?")
            .bind(title)
            .bind(thread_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        Ok(())
    }

    async fn delete(&self, thread_id: &str) -> Result<(), RepositoryError> {
        // Idempotent: deleting a thread that never got a metadata row is fine.
        sqlx::query("DELETE FROM chat_meta WHERE thread_id = ?")
            .bind(thread_id)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn save_feedback(&self, feedback: &ChatFeedback) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO chat_feedback (id, thread_id, message_id, message_content, data_correct, question_answered, comment, created_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(feedback.id.to_string())
        .bind(&feedback.thread_id)
        .bind(feedback.message_id.map(|id| id.to_string()))
        .bind(&feedback.message_content)
        .bind(feedback.data_correct)
        .bind(feedback.question_answered)
        .bind(&feedback.comment)
        .bind(format_datetime(&feedback.created_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::DatabasePool;
    use chrono::TimeZone;

    async fn test_pool() -> DatabasePool {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        // Leak tempdir so it lives for the test
        std::mem::forget(dir);
        DatabasePool::new(&url).await.unwrap()
    }

    fn make_meta(thread_id: &str, title: Option<&str>) -> ChatMeta {
        ChatMeta {
            thread_id: thread_id.to_string(),
            title: title.map(str::to_string),
            last_activity: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        repo.upsert(&make_meta("1", None)).await.unwrap();

        let found = repo.get("1").await.unwrap().unwrap();
        assert_eq!(found.thread_id, "1");
        assert!(found.title.is_none());
        assert_eq!(found.display_title(), "New Chat [1]");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        repo.upsert(&make_meta("2", None)).await.unwrap();
        repo.upsert(&make_meta("2", Some("Coding time"))).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].title.as_deref(), Some("Coding time"));
    }

    #[tokio::test]
    async fn test_get_missing_returns_none() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_orders_by_last_activity() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        let older = ChatMeta {
            thread_id: "old".to_string(),
            title: Some("Older".to_string()),
            last_activity: Utc.with_ymd_and_hms(2026, 1, 1, 9, 0, 0).unwrap(),
        };
        let newer = ChatMeta {
            thread_id: "new".to_string(),
            title: Some("Newer".to_string()),
            last_activity: Utc.with_ymd_and_hms(2026, 1, 2, 9, 0, 0).unwrap(),
        };
        repo.upsert(&older).await.unwrap();
        repo.upsert(&newer).await.unwrap();

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].thread_id, "new");
        assert_eq!(all[1].thread_id, "old");
    }

    #[tokio::test]
    async fn test_set_title() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        repo.upsert(&make_meta("3", None)).await.unwrap();
        repo.set_title("3", "Focus report").await.unwrap();

        let found = repo.get("3").await.unwrap().unwrap();
        assert_eq!(found.title.as_deref(), Some("Focus report"));
    }

    #[tokio::test]
    async fn test_set_title_missing_thread_is_not_found() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        let err = repo.set_title("missing", "title").await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        repo.upsert(&make_meta("4", Some("Bye"))).await.unwrap();
        repo.delete("4").await.unwrap();
        assert!(repo.get("4").await.unwrap().is_none());

        // Second delete of the same thread still succeeds
        repo.delete("4").await.unwrap();
    }

    #[tokio::test]
    async fn test_save_feedback() {
        let pool = test_pool().await;
        let repo = SqliteChatRepository::new(pool);

        let mut feedback =
            ChatFeedback::new("5", Some(Uuid::now_v7()), "You spent 91 minutes coding.");
        feedback.data_correct = Some(true);
        feedback.question_answered = Some(false);
        feedback.comment = Some("right number, wrong day".to_string());

        repo.save_feedback(&feedback).await.unwrap();

        let row = sqlx::query("SELECT * FROM chat_feedback WHERE thread_id = '5'")
            .fetch_one(&repo.pool.reader)
            .await
            .unwrap();
        let content: String = row.try_get("message_content").unwrap();
        let data_correct: Option<bool> = row.try_get("data_correct").unwrap();
        let answered: Option<bool> = row.try_get("question_answered").unwrap();
        assert_eq!(content, "You spent 91 minutes coding.");
        assert_eq!(data_correct, Some(true));
        assert_eq!(answered, Some(false));
    }
}
