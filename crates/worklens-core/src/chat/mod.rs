//! Conversation management: listing, history, renaming, deletion, feedback.

pub mod service;

pub use service::ChatService;
