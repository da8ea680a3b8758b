//! ChatRepository trait definition.
//!
//! Thread metadata (titles, activity timestamps) and answer feedback.
//! Follows the same RPITIT pattern as CheckpointRepository.

use worklens_types::checkpoint::{ChatFeedback, ChatMeta};
use worklens_types::error::RepositoryError;

/// Repository trait for chat metadata and feedback persistence.
///
/// Implementations live in worklens-infra (e.g., `SqliteChatRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait ChatRepository: Send + Sync {
    /// Insert or replace a thread's metadata row.
    fn upsert(
        &self,
        meta: &ChatMeta,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Get a thread's metadata.
    fn get(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<ChatMeta>, RepositoryError>> + Send;

    /// List all threads, most recently active first.
    fn list(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<ChatMeta>, RepositoryError>> + Send;

    /// Set a thread's title.
    ///
    /// Returns `RepositoryError::NotFound` when the thread has no metadata
    /// row yet.
    fn set_title(
        &self,
        thread_id: &str,
        title: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a thread's metadata row.
    fn delete(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record feedback on a delivered answer.
    fn save_feedback(
        &self,
        feedback: &ChatFeedback,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
