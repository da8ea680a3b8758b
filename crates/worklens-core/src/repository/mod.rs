//! Repository trait definitions (ports).
//!
//! These traits define the storage interface that the infrastructure layer
//! (worklens-infra) implements. The core crate never depends on any
//! specific storage technology.

pub mod chat;
pub mod checkpoint;

pub use chat::ChatRepository;
pub use checkpoint::CheckpointRepository;
