//! Routing-context node: pins the system preamble and resolves relative
//! time references in the question.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{Instrument, info_span};

use worklens_types::state::TurnState;

use crate::llm::{BoxLlmProvider, complete_structured_over};
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

const ENRICH_SYSTEM_PROMPT: &str = r#"Rewrite the user's latest question so it is self-contained for SQL generation over their activity data.

- Resolve relative time references ("today", "yesterday", "last week", "this morning") into concrete dates using the current time given below.
- For follow-ups, fold in what they refer to from the conversation ("and yesterday?" after a coding-time question becomes a coding-time question about yesterday's date).
- Keep the user's intent and wording otherwise; do not answer the question.

Current time: {current_time}

Respond with a JSON object containing the rewritten question."#;

/// Assistant preamble pinned at position zero of the history.
///
/// Replaced, never duplicated: every change goes through
/// [`TurnState::upsert_system_preamble`].
pub fn system_preamble(current_time: &str) -> String {
    format!(
        "You are WorkLens, a conversational assistant for a self-tracking tool that records \
         computer activity locally: which windows and apps were in focus, keyboard and mouse \
         input volume, and self-reported session check-ins. All data stays on the user's \
         machine.\n\n\
         You answer questions about this data by generating SQL against the local activity \
         database and explaining the results.\n\n\
         Current time: {current_time}"
    )
}

/// Structured enrichment result.
#[derive(Debug, Deserialize, JsonSchema)]
struct EnrichedQuestion {
    /// The question with time context made explicit.
    question: String,
}

pub struct ContextNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl ContextNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for ContextNode {
    fn name(&self) -> &'static str {
        node_name::GIVE_CONTEXT
    }

    fn label(&self) -> &'static str {
        "give context"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        state.upsert_system_preamble(system_preamble(&state.current_time));

        let system = ENRICH_SYSTEM_PROMPT.replace("{current_time}", &state.current_time);
        let span = info_span!(
            "gen_ai.give_context",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );

        let parsed: EnrichedQuestion = complete_structured_over(
            &self.provider,
            &self.model,
            "EnrichedQuestion",
            &system,
            super::llm_history(&state),
        )
        .instrument(span)
        .await?;

        if !parsed.question.trim().is_empty() {
            tracing::debug!(
                thread_id = %state.thread_id,
                enriched = %parsed.question,
                "question enriched with time context"
            );
            state.question = parsed.question;
        }

        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::canned_provider;
    use worklens_types::llm::MessageRole;

    #[tokio::test]
    async fn pins_preamble_and_rewrites_question() {
        let provider =
            canned_provider(r#"{"question":"How long did I code on 2026-08-25?"}"#);
        let node = ContextNode::new(provider, "selection-model");

        let mut state = TurnState::new("1", "how long did I code yesterday?");
        state.push_user_message("how long did I code yesterday?");
        let state = node.run(state).await.unwrap();

        assert_eq!(state.messages[0].role, MessageRole::System);
        assert!(state.messages[0].content.contains("WorkLens"));
        assert_eq!(state.question, "How long did I code on 2026-08-25?");
    }

    #[tokio::test]
    async fn empty_enrichment_keeps_the_original_question() {
        let provider = canned_provider(r#"{"question":"  "}"#);
        let node = ContextNode::new(provider, "selection-model");

        let state = node
            .run(TurnState::new("1", "how long did I code?"))
            .await
            .unwrap();
        assert_eq!(state.question, "how long did I code?");
    }

    #[test]
    fn preamble_carries_the_current_time() {
        let preamble = system_preamble("2026-08-26T09:00:00Z");
        assert!(preamble.contains("Current time: 2026-08-26T09:00:00Z"));
    }
}
