//! Turn control HTTP handlers.
//!
//! REST alternatives to the WebSocket `resume` and `confirm_query` frames,
//! for clients that hold the approval UI outside the socket. A turn resumed
//! here still streams its progress events over any connected sockets.
//!
//! Endpoints:
//! - POST /api/v1/chats/{id}/resume - Approve or reject the paused query
//! - POST /api/v1/chats/{id}/query  - Resume with a hand-corrected query

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Deserialize;
use uuid::Uuid;

use worklens_core::turn::TurnReply;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for POST /chats/{id}/resume.
#[derive(Debug, Deserialize)]
pub struct ResumeRequest {
    pub approved: bool,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Request body for POST /chats/{id}/query.
#[derive(Debug, Deserialize)]
pub struct ConfirmQueryRequest {
    pub query: String,
    pub data: serde_json::Value,
}

/// Render a turn reply as a JSON payload for the REST surface.
fn reply_json(reply: TurnReply) -> serde_json::Value {
    match reply {
        TurnReply::Completed { message } => {
            serde_json::json!({"status": "completed", "message": message})
        }
        TurnReply::Paused { query, data } => {
            serde_json::json!({"status": "paused", "query": query, "data": data})
        }
        TurnReply::Rejected => serde_json::json!({"status": "rejected"}),
    }
}

/// POST /api/v1/chats/{id}/resume - Approve or reject the paused query.
pub async fn resume_turn(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<ResumeRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let reply = state
        .turn_service
        .resume_turn(&thread_id, body.approved, body.data)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(reply_json(reply), request_id, elapsed)
        .with_link("history", &format!("/api/v1/chats/{thread_id}/history"));

    Ok(Json(resp))
}

/// POST /api/v1/chats/{id}/query - Resume the paused turn with an edited query.
pub async fn confirm_query(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<ConfirmQueryRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.query.trim().is_empty() {
        return Err(AppError::Validation("Query cannot be empty".to_string()));
    }

    let reply = state
        .turn_service
        .confirm_query(&thread_id, body.query, body.data)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(reply_json(reply), request_id, elapsed)
        .with_link("history", &format!("/api/v1/chats/{thread_id}/history"));

    Ok(Json(resp))
}
