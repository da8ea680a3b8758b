//! Axum router configuration with middleware.
//!
//! All REST routes are under `/api/v1/`. The WebSocket endpoint and the
//! health check live at the top level. Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{delete, get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        // Chat management
        .route("/chats", post(handlers::chats::create_chat))
        .route("/chats", get(handlers::chats::list_chats))
        .route("/chats/{id}/history", get(handlers::chats::get_history))
        .route("/chats/{id}", patch(handlers::chats::rename_chat))
        .route("/chats/{id}", delete(handlers::chats::delete_chat))
        // Turn control (REST alternatives to the WebSocket frames)
        .route("/chats/{id}/resume", post(handlers::turn::resume_turn))
        .route("/chats/{id}/query", post(handlers::turn::confirm_query))
        // Standalone query tools for the review UI
        .route("/query/correct", post(handlers::query::correct_query))
        .route("/query/execute", post(handlers::query::execute_query))
        // Feedback
        .route("/feedback", post(handlers::chats::submit_feedback));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/health", get(health_check))
        .route("/ws/chat", get(handlers::ws::ws_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /health - Simple health check endpoint.
async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
