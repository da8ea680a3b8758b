//! CheckpointRepository trait definition.
//!
//! Durable per-thread snapshots of the turn state. The store assigns each
//! checkpoint a key that strictly increases within its thread; `latest`
//! returns the highest-keyed row. That ordering is what crash recovery and
//! the resume flow rely on, so implementations must never reuse or reorder
//! keys.

use worklens_types::checkpoint::{Checkpoint, NewCheckpoint};
use worklens_types::error::RepositoryError;

/// Repository trait for turn-state checkpoints.
///
/// Implementations live in worklens-infra (e.g., `SqliteCheckpointRepository`).
/// Uses native async fn in traits (RPITIT, Rust 2024 edition).
pub trait CheckpointRepository: Send + Sync {
    /// Append a checkpoint and return it with its assigned key.
    fn save(
        &self,
        checkpoint: &NewCheckpoint,
    ) -> impl std::future::Future<Output = Result<Checkpoint, RepositoryError>> + Send;

    /// The most recent checkpoint for a thread, if any.
    fn latest(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<Option<Checkpoint>, RepositoryError>> + Send;

    /// Delete every checkpoint belonging to a thread.
    fn delete_thread(
        &self,
        thread_id: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
