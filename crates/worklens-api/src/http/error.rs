//! Application error type mapping to HTTP status codes and envelope format.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use worklens_core::turn::TurnError;
use worklens_core::workflow::EngineError;
use worklens_types::error::{AnalyticsError, ChatError};
use worklens_types::llm::LlmError;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Turn pipeline errors.
    Turn(TurnError),
    /// Chat management errors.
    Chat(ChatError),
    /// Activity database errors.
    Analytics(AnalyticsError),
    /// LLM provider errors.
    Llm(LlmError),
    /// Validation error.
    Validation(String),
    /// Generic internal error.
    Internal(String),
}

impl From<TurnError> for AppError {
    fn from(e: TurnError) -> Self {
        AppError::Turn(e)
    }
}

impl From<ChatError> for AppError {
    fn from(e: ChatError) -> Self {
        AppError::Chat(e)
    }
}

impl From<AnalyticsError> for AppError {
    fn from(e: AnalyticsError) -> Self {
        AppError::Analytics(e)
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Llm(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Turn(TurnError::Engine(EngineError::NoCheckpoint(thread_id))) => {
                (StatusCode::NOT_FOUND, "CHAT_NOT_FOUND", format!("No chat found for thread '{thread_id}'"))
            }
            AppError::Turn(e @ TurnError::Engine(EngineError::InvalidResume { .. })) => {
                (StatusCode::CONFLICT, "INVALID_RESUME", e.to_string())
            }
            AppError::Turn(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "TURN_FAILED", e.to_string())
            }
            AppError::Chat(ChatError::NotFound) => {
                (StatusCode::NOT_FOUND, "CHAT_NOT_FOUND", "Chat not found".to_string())
            }
            AppError::Chat(ChatError::MessageNotFound) => {
                (StatusCode::NOT_FOUND, "MESSAGE_NOT_FOUND", "Message not found".to_string())
            }
            AppError::Chat(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "CHAT_ERROR", e.to_string())
            }
            AppError::Analytics(AnalyticsError::TableNotAllowed(table)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", format!("Table '{table}' is not queryable"))
            }
            AppError::Analytics(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "QUERY_ERROR", e.to_string())
            }
            AppError::Llm(e) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "LLM_ERROR", e.to_string())
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            AppError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg.clone())
            }
        };

        let body = json!({
            "data": null,
            "meta": {
                "request_id": "",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "response_time_ms": 0
            },
            "errors": [{
                "code": code,
                "message": message,
            }]
        });

        (
            status,
            [(axum::http::header::CONTENT_TYPE, "application/json")],
            body.to_string(),
        )
            .into_response()
    }
}
