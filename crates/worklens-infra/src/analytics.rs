//! Read-only SQLite adapter for the activity database.
//!
//! Implements `AnalyticsStore` from `worklens-core`. The collector owns
//! this database; Worklens opens it strictly read-only, so generated SQL
//! cannot write no matter what it says. The allow-list is the second
//! guard: statements referencing tables outside it are rejected before
//! they run.

use std::path::Path;
use std::time::Duration;

use base64::Engine;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};

use worklens_core::analytics::AnalyticsStore;
use worklens_types::error::AnalyticsError;

/// SQLite-backed implementation of `AnalyticsStore`.
pub struct SqliteAnalyticsStore {
    pool: SqlitePool,
    allowed_tables: Vec<String>,
}

impl SqliteAnalyticsStore {
    /// Open the activity database read-only.
    ///
    /// Fails when the file does not exist: the collector creates it, and
    /// opening read-only must never create an empty one in its place.
    pub async fn open(
        db_path: &Path,
        allowed_tables: Vec<String>,
    ) -> Result<Self, AnalyticsError> {
        if !db_path.exists() {
            tracing::error!(path = %db_path.display(), "activity database not found");
            return Err(AnalyticsError::Connection);
        }

        let opts = SqliteConnectOptions::new()
            .filename(db_path)
            .read_only(true)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| {
                tracing::error!(path = %db_path.display(), error = %e, "activity database open failed");
                AnalyticsError::Connection
            })?;

        Ok(Self {
            pool,
            allowed_tables,
        })
    }

    fn check_allowed(&self, table: &str) -> Result<(), AnalyticsError> {
        if self
            .allowed_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
        {
            Ok(())
        } else {
            Err(AnalyticsError::TableNotAllowed(table.to_string()))
        }
    }
}

// ---------------------------------------------------------------------------
// Statement inspection
// ---------------------------------------------------------------------------

/// Table names referenced after `FROM` and `JOIN`, lowercased and stripped
/// of quoting and schema qualifiers. A heuristic, not a SQL parser; the
/// read-only connection is the hard guarantee behind it.
fn referenced_tables(query: &str) -> Vec<String> {
    let mut tables = Vec::new();
    let mut expect_table = false;

    let tokens = query
        .split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '(' | ')'))
        .filter(|t| !t.is_empty());

    for token in tokens {
        let lower = token.to_ascii_lowercase();
        if expect_table {
            expect_table = false;
            let name = lower
                .trim_matches(|c| matches!(c, '"' | '`' | '\''))
                .rsplit('.')
                .next()
                .unwrap_or("")
                .to_string();
            // A subquery opener is not a table name.
            if !name.is_empty() && name != "select" {
                tables.push(name);
            }
        }
        if lower == "from" || lower == "join" {
            expect_table = true;
        }
    }

    tables
}

fn is_select_statement(query: &str) -> bool {
    let head = query.trim_start().to_ascii_lowercase();
    head.starts_with("select") || head.starts_with("with")
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

/// Convert one row into a JSON object keyed by column name.
///
/// Conversion follows the value's storage class, so expression columns come
/// through with their runtime type. BLOBs are base64 encoded.
fn row_to_json(row: &SqliteRow) -> Result<Value, AnalyticsError> {
    let mut object = Map::with_capacity(row.columns().len());

    for column in row.columns() {
        let ordinal = column.ordinal();
        let raw = row
            .try_get_raw(ordinal)
            .map_err(|e| AnalyticsError::Query(e.to_string()))?;

        let value = if raw.is_null() {
            Value::Null
        } else {
            match raw.type_info().name() {
                "INTEGER" => Value::from(
                    row.try_get::<i64, _>(ordinal)
                        .map_err(|e| AnalyticsError::Query(e.to_string()))?,
                ),
                "REAL" => Value::from(
                    row.try_get::<f64, _>(ordinal)
                        .map_err(|e| AnalyticsError::Query(e.to_string()))?,
                ),
                "BLOB" => {
                    let bytes = row
                        .try_get::<Vec<u8>, _>(ordinal)
                        .map_err(|e| AnalyticsError::Query(e.to_string()))?;
                    Value::String(base64::engine::general_purpose::STANDARD.encode(bytes))
                }
                _ => Value::String(
                    row.try_get::<String, _>(ordinal)
                        .map_err(|e| AnalyticsError::Query(e.to_string()))?,
                ),
            }
        };

        object.insert(column.name().to_string(), value);
    }

    Ok(Value::Object(object))
}

// ---------------------------------------------------------------------------
// AnalyticsStore implementation
// ---------------------------------------------------------------------------

impl AnalyticsStore for SqliteAnalyticsStore {
    async fn table_names(&self) -> Result<Vec<String>, AnalyticsError> {
        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalyticsError::Query(e.to_string()))?;

        let mut present = Vec::with_capacity(rows.len());
        for row in &rows {
            let name: String = row
                .try_get("name")
                .map_err(|e| AnalyticsError::Query(e.to_string()))?;
            present.push(name);
        }

        // Allow-list order, restricted to tables that actually exist.
        Ok(self
            .allowed_tables
            .iter()
            .filter(|t| present.iter().any(|p| p.eq_ignore_ascii_case(t)))
            .cloned()
            .collect())
    }

    async fn schema_overview(&self, tables: &[String]) -> Result<String, AnalyticsError> {
        let mut parts = Vec::with_capacity(tables.len());

        for table in tables {
            self.check_allowed(table)?;

            let row = sqlx::query(
                "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?",
            )
            .bind(table)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AnalyticsError::Query(e.to_string()))?;

            let ddl: String = match row {
                Some(row) => row
                    .try_get("sql")
                    .map_err(|e| AnalyticsError::Query(e.to_string()))?,
                None => {
                    return Err(AnalyticsError::Query(format!(
                        "table '{table}' does not exist in the activity database"
                    )));
                }
            };
            parts.push(ddl);
        }

        Ok(parts.join("\n\n"))
    }

    async fn activity_values(&self) -> Result<Vec<String>, AnalyticsError> {
        let rows = sqlx::query(
            "SELECT DISTINCT activity FROM window_activity
             WHERE activity IS NOT NULL ORDER BY activity",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AnalyticsError::Query(e.to_string()))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            let value: String = row
                .try_get("activity")
                .map_err(|e| AnalyticsError::Query(e.to_string()))?;
            values.push(value);
        }

        Ok(values)
    }

    async fn run_select(&self, query: &str) -> Result<Value, AnalyticsError> {
        if !is_select_statement(query) {
            return Err(AnalyticsError::Query(
                "only SELECT statements can run against the activity database".to_string(),
            ));
        }
        for table in referenced_tables(query) {
            self.check_allowed(&table)?;
        }

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| AnalyticsError::Query(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(row_to_json(row)?);
        }

        Ok(Value::Array(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allowed() -> Vec<String> {
        vec![
            "window_activity".to_string(),
            "user_input".to_string(),
            "session".to_string(),
        ]
    }

    /// Build an activity database the way the collector would, then reopen
    /// it read-only through the store.
    async fn seeded_store() -> SqliteAnalyticsStore {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("activity.db");
        // The pool opens connections lazily; the files must outlive the helper.
        std::mem::forget(dir);

        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let setup = SqlitePool::connect(&url).await.unwrap();
        sqlx::query(
            "CREATE TABLE window_activity (
                 id INTEGER PRIMARY KEY,
                 app TEXT NOT NULL,
                 activity TEXT,
                 minutes REAL NOT NULL
             )",
        )
        .execute(&setup)
        .await
        .unwrap();
        sqlx::query(
            "CREATE TABLE user_input (id INTEGER PRIMARY KEY, keystrokes INTEGER NOT NULL)",
        )
        .execute(&setup)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO window_activity (app, activity, minutes) VALUES
                 ('Zed', 'Coding', 61.5),
                 ('Firefox', 'Work Related Browsing', 20.0),
                 ('Zed', 'Coding', 29.5),
                 ('Slack', NULL, 5.0)",
        )
        .execute(&setup)
        .await
        .unwrap();
        setup.close().await;

        SqliteAnalyticsStore::open(&db_path, allowed()).await.unwrap()
    }

    #[tokio::test]
    async fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result =
            SqliteAnalyticsStore::open(&dir.path().join("nope.db"), allowed()).await;
        assert!(matches!(result, Err(AnalyticsError::Connection)));
    }

    #[tokio::test]
    async fn test_table_names_keeps_allow_list_order() {
        let store = seeded_store().await;
        // "session" is allowed but absent from the file
        let names = store.table_names().await.unwrap();
        assert_eq!(names, vec!["window_activity", "user_input"]);
    }

    #[tokio::test]
    async fn test_schema_overview_returns_ddl() {
        let store = seeded_store().await;
        let overview = store
            .schema_overview(&["window_activity".to_string()])
            .await
            .unwrap();
        assert!(overview.contains("CREATE TABLE window_activity"));
        assert!(overview.contains("minutes REAL NOT NULL"));
    }

    #[tokio::test]
    async fn test_schema_overview_rejects_unlisted_table() {
        let store = seeded_store().await;
        let err = store
            .schema_overview(&["sqlite_master".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::TableNotAllowed(t) if t == "sqlite_master"));
    }

    #[tokio::test]
    async fn test_activity_values_distinct_sorted() {
        let store = seeded_store().await;
        let values = store.activity_values().await.unwrap();
        assert_eq!(values, vec!["Coding", "Work Related Browsing"]);
    }

    #[tokio::test]
    async fn test_run_select_returns_typed_rows() {
        let store = seeded_store().await;
        let rows = store
            .run_select(
                "SELECT app, SUM(minutes) AS minutes FROM window_activity
                 GROUP BY app ORDER BY minutes DESC",
            )
            .await
            .unwrap();

        assert_eq!(
            rows,
            json!([
                {"app": "Zed", "minutes": 91.0},
                {"app": "Firefox", "minutes": 20.0},
                {"app": "Slack", "minutes": 5.0},
            ])
        );
    }

    #[tokio::test]
    async fn test_run_select_preserves_nulls() {
        let store = seeded_store().await;
        let rows = store
            .run_select("SELECT app, activity FROM window_activity WHERE app = 'Slack'")
            .await
            .unwrap();
        assert_eq!(rows[0]["activity"], Value::Null);
    }

    #[tokio::test]
    async fn test_run_select_rejects_unlisted_table() {
        let store = seeded_store().await;
        let err = store
            .run_select("SELECT * FROM sqlite_master")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::TableNotAllowed(t) if t == "sqlite_master"));
    }

    #[tokio::test]
    async fn test_run_select_rejects_writes() {
        let store = seeded_store().await;
        let err = store
            .run_select("DELETE FROM window_activity")
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::Query(_)));
    }

    #[tokio::test]
    async fn test_run_select_allows_joins_and_subqueries() {
        let store = seeded_store().await;
        let rows = store
            .run_select(
                "SELECT w.app FROM window_activity w
                 JOIN (SELECT id FROM user_input) u ON u.id = w.id",
            )
            .await
            .unwrap();
        assert!(rows.as_array().unwrap().is_empty());
    }

    #[test]
    fn test_referenced_tables_parses_quoting_and_qualifiers() {
        let tables = referenced_tables(
            "SELECT * FROM \"window_activity\" JOIN main.user_input ON 1=1",
        );
        assert_eq!(tables, vec!["window_activity", "user_input"]);
    }

    #[test]
    fn test_referenced_tables_skips_subqueries() {
        let tables = referenced_tables("SELECT * FROM (SELECT 1)");
        assert!(tables.is_empty());
    }
}
