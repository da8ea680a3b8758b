//! LLM provider implementations.
//!
//! The pipeline only ever sees [`BoxLlmProvider`]; this module decides
//! which concrete backend goes inside the box. Today that is always the
//! OpenAI-compatible provider, which covers local Ollama, vLLM, and any
//! hosted endpoint that speaks the same protocol.

pub mod openai_compat;

pub use openai_compat::OpenAiCompatProvider;

use worklens_core::llm::BoxLlmProvider;
use worklens_types::config::LlmConfig;

/// Build the boxed provider the pipeline talks to.
pub fn create_provider(config: &LlmConfig) -> BoxLlmProvider {
    BoxLlmProvider::new(OpenAiCompatProvider::new(config))
}
