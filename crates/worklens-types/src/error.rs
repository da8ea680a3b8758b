use thiserror::Error;

/// Errors from repository operations (used by trait definitions in
/// worklens-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors related to chat management operations.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("chat not found")]
    NotFound,

    #[error("message not found")]
    MessageNotFound,

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Errors from the activity database the generated SQL runs against.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error("database connection error")]
    Connection,

    #[error("table '{0}' is not queryable")]
    TableNotAllowed(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("query execution exceeded {0} seconds")]
    Timeout(u64),
}

/// Errors from rendering a plot script.
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("plot script rejected: {0}")]
    InvalidScript(String),

    #[error("plot execution failed: {0}")]
    Execution(String),

    #[error("plot execution exceeded {0} seconds")]
    Timeout(u64),

    #[error("plot artifact missing at '{0}'")]
    ArtifactMissing(String),
}
