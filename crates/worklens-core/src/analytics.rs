//! AnalyticsStore trait definition.
//!
//! Read-only port onto the locally collected activity database. The
//! pipeline uses it twice: to describe the schema to the model before SQL
//! generation, and to execute the generated SQL. Implementations must open
//! the database read-only; the generated SQL is model output and gets no
//! write access regardless of what it says.

use serde_json::Value;
use worklens_types::error::AnalyticsError;

/// Port onto the activity database the generated SQL runs against.
///
/// Implementations live in worklens-infra (e.g., `SqliteAnalyticsStore`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait AnalyticsStore: Send + Sync {
    /// Names of the queryable tables, in allow-list order.
    fn table_names(&self) -> impl std::future::Future<Output = Result<Vec<String>, AnalyticsError>> + Send;

    /// Schema DDL for the given tables, as prompt context for SQL generation.
    fn schema_overview(
        &self,
        tables: &[String],
    ) -> impl std::future::Future<Output = Result<String, AnalyticsError>> + Send;

    /// Distinct activity category values observed in the data.
    ///
    /// Lets the selection stage match the question's wording ("coding",
    /// "browsing") against categories that actually occur.
    fn activity_values(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<String>, AnalyticsError>> + Send;

    /// Execute a SELECT and return its rows as a JSON array of objects.
    ///
    /// Implementations must reject statements touching tables outside the
    /// allow-list.
    fn run_select(
        &self,
        query: &str,
    ) -> impl std::future::Future<Output = Result<Value, AnalyticsError>> + Send;
}
