//! Chat management HTTP handlers.
//!
//! Endpoints:
//! - POST   /api/v1/chats              - Allocate a new chat thread
//! - GET    /api/v1/chats              - List chats, most recent first
//! - GET    /api/v1/chats/{id}/history - Message history for a chat
//! - PATCH  /api/v1/chats/{id}         - Rename a chat
//! - DELETE /api/v1/chats/{id}         - Delete a chat and its checkpoints
//! - POST   /api/v1/feedback           - Attach feedback to an answer

use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use worklens_core::chat::service::FeedbackInput;
use worklens_types::state::ChatMessage;

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// One chat in the list view, with the display title already resolved.
#[derive(Debug, Serialize)]
pub struct ChatSummary {
    pub thread_id: String,
    pub title: String,
    pub last_activity: chrono::DateTime<chrono::Utc>,
}

/// Request body for PATCH /chats/{id}.
#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub title: String,
}

/// Request body for POST /feedback.
#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub thread_id: String,
    pub message_id: Uuid,
    #[serde(default)]
    pub data_correct: Option<bool>,
    #[serde(default)]
    pub question_answered: Option<bool>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// POST /api/v1/chats - Allocate the next thread id.
///
/// No rows are written until the first turn runs; an allocated id that is
/// never used simply gets reissued later.
pub async fn create_chat(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let thread_id = state.chat_service.next_thread_id().await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(
        serde_json::json!({"thread_id": thread_id}),
        request_id,
        elapsed,
    )
    .with_link("history", &format!("/api/v1/chats/{thread_id}/history"));

    Ok(Json(resp))
}

/// GET /api/v1/chats - List chats, most recently active first.
pub async fn list_chats(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<ChatSummary>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let chats = state.chat_service.list().await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let summaries: Vec<ChatSummary> = chats
        .iter()
        .map(|meta| ChatSummary {
            thread_id: meta.thread_id.clone(),
            title: meta.display_title(),
            last_activity: meta.last_activity,
        })
        .collect();

    let resp = ApiResponse::success(summaries, request_id, elapsed)
        .with_link("self", "/api/v1/chats");

    Ok(Json(resp))
}

/// GET /api/v1/chats/{id}/history - Message history for a chat.
pub async fn get_history(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<Vec<ChatMessage>>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let messages = state.chat_service.history(&thread_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(messages, request_id, elapsed)
        .with_link("self", &format!("/api/v1/chats/{thread_id}/history"));

    Ok(Json(resp))
}

/// PATCH /api/v1/chats/{id} - Rename a chat.
pub async fn rename_chat(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    if body.title.trim().is_empty() {
        return Err(AppError::Validation("Title cannot be empty".to_string()));
    }

    state.chat_service.rename(&thread_id, &body.title).await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(
        serde_json::json!({"renamed": true, "thread_id": thread_id}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}

/// DELETE /api/v1/chats/{id} - Delete a chat and its checkpoints.
pub async fn delete_chat(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    state.chat_service.delete(&thread_id).await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(
        serde_json::json!({"deleted": true}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}

/// POST /api/v1/feedback - Attach feedback to an assistant message.
pub async fn submit_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = Uuid::now_v7().to_string();

    let input = FeedbackInput {
        data_correct: body.data_correct,
        question_answered: body.question_answered,
        comment: body.comment,
    };

    let feedback_id = state
        .chat_service
        .store_feedback(&body.thread_id, body.message_id, input)
        .await?;

    let elapsed = start.elapsed().as_millis() as u64;

    let resp = ApiResponse::success(
        serde_json::json!({"feedback_id": feedback_id}),
        request_id,
        elapsed,
    );

    Ok(Json(resp))
}
