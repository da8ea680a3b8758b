//! LLM provider abstractions for Worklens.
//!
//! This module defines the core traits and utilities for LLM integration:
//! - `LlmProvider`: RPITIT trait for concrete provider implementations
//! - `BoxLlmProvider`: Object-safe wrapper for dynamic dispatch
//! - `structured`: helper for schema-constrained JSON completions

pub mod box_provider;
pub mod provider;
pub mod structured;

pub use box_provider::BoxLlmProvider;
pub use provider::LlmProvider;
pub use structured::{complete_structured, complete_structured_over};
