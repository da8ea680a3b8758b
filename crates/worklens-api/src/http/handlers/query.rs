//! Standalone query tool handlers for the review UI.
//!
//! Both operate outside the pipeline: while a turn waits at the approval
//! gate, the client can ask for an LLM rewrite of the pending query or dry-run
//! an edited query without resuming the turn.
//!
//! Endpoints:
//! - POST /api/v1/query/correct - Rewrite a query per a free-text instruction
//! - POST /api/v1/query/execute - Dry-run a query against the activity data

use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use serde::Deserialize;
use uuid::Uuid;

use worklens_core::analytics::AnalyticsStore;
use worklens_core::nodes::correct_query as correct;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for POST /query/correct.
#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub query: String,
    pub instruction: String,
}

/// Request body for POST /query/execute.
#[derive(Debug, Deserialize)]
pub struct ExecuteRequest {
    pub query: String,
}

/// POST /api/v1/query/correct - Rewrite a query per the user's instruction.
pub async fn correct_query(
    State(state): State<AppState>,
    Json(body): Json<CorrectRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.query.trim().is_empty() {
        return Err(AppError::Validation("Query cannot be empty".to_string()));
    }

    let corrected = correct(
        &state.provider,
        &state.config.llm.models.sql,
        &body.query,
        &body.instruction,
    )
    .await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(
        serde_json::json!({"query": corrected}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}

/// POST /api/v1/query/execute - Dry-run a query against the activity data.
///
/// Failures and timeouts come back as 200 with an `error` payload; the
/// client renders them inline next to the query editor rather than as a
/// request failure.
pub async fn execute_query(
    State(state): State<AppState>,
    Json(body): Json<ExecuteRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let timeout = Duration::from_secs(state.config.analytics.query_timeout_secs);
    let result = match tokio::time::timeout(timeout, state.analytics.run_select(&body.query)).await
    {
        Ok(Ok(rows)) => rows,
        Ok(Err(e)) => serde_json::json!({"error": format!("Query execution failed: {e}")}),
        Err(_) => serde_json::json!({
            "error": "Query execution exceeded 3 minutes and was aborted."
        }),
    };

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(result, request_id, elapsed);

    Ok(Json(resp))
}
