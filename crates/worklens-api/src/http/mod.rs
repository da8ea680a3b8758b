//! HTTP/WebSocket transport layer for Worklens.
//!
//! Axum-based REST API at `/api/v1/` with envelope response format and CORS
//! support, plus the `/ws/chat` WebSocket that runs turns and streams their
//! progress. The server binds to localhost by default and carries no
//! authentication; it fronts a single user's local data.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
