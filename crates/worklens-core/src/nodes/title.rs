//! Thread title generation via LLM.
//!
//! Runs once per thread, on the first data question. The title lands in
//! chat metadata, not in the turn state, so it may lag the first answer
//! without blocking it.

use std::sync::Arc;

use tracing::{Instrument, info_span};

use worklens_types::llm::{CompletionRequest, Message};
use worklens_types::state::TurnState;

use crate::llm::BoxLlmProvider;
use crate::repository::ChatRepository;
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

/// System prompt for the title generation call.
const TITLE_SYSTEM_PROMPT: &str = r#"Generate a short, descriptive title (at most 25 characters) for a conversation that starts with the given question about the user's tracked computer activity. Capture the topic, not the phrasing. Return ONLY the title text, nothing else.

Examples:
- "Coding time today"
- "App usage last week"
- "Typing activity trend"
- "Meetings vs. focus time""#;

pub struct TitleNode<R: ChatRepository> {
    provider: Arc<BoxLlmProvider>,
    model: String,
    chats: Arc<R>,
}

impl<R: ChatRepository> TitleNode<R> {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>, chats: Arc<R>) -> Self {
        Self {
            provider,
            model: model.into(),
            chats,
        }
    }
}

impl<R: ChatRepository + 'static> Node for TitleNode<R> {
    fn name(&self) -> &'static str {
        node_name::GENERATE_TITLE
    }

    fn label(&self) -> &'static str {
        "generate title"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let request = CompletionRequest::text(
            &self.model,
            vec![Message::user(format!("Question: {}", state.question))],
            50,
        )
        .with_system(TITLE_SYSTEM_PROMPT)
        .with_temperature(0.3);

        let span = info_span!(
            "gen_ai.generate_title",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let response = self.provider.complete(&request).instrument(span).await?;

        // Trim whitespace and surrounding quotes from the title
        let title = response
            .content
            .trim()
            .trim_matches('"')
            .trim_matches('\'')
            .trim()
            .to_string();

        // A failed metadata write must not fail the turn; the thread just
        // keeps its fallback title until renamed.
        if let Err(e) = self.chats.set_title(&state.thread_id, &title).await {
            tracing::warn!(
                thread_id = %state.thread_id,
                error = %e,
                "failed to persist generated title"
            );
        } else {
            state.title_exists = true;
        }

        Ok(state)
    }
}
