//! Shared domain types for Worklens.
//!
//! This crate contains the core domain types used across the Worklens
//! pipeline: the per-turn state record, checkpoints, chat metadata,
//! streaming events, LLM request/response shapes, and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror,
//! schemars, secrecy.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod state;
