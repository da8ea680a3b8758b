//! Infrastructure layer for Worklens.
//!
//! Contains implementations of the ports defined in `worklens-core`:
//! SQLite storage for checkpoints and chat metadata, the read-only
//! activity database adapter, the OpenAI-compatible LLM provider, and
//! the Python plot runner.

pub mod analytics;
pub mod config;
pub mod llm;
pub mod plot;
pub mod sqlite;
