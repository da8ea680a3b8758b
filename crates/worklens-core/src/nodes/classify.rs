//! Question classification, the first node of every turn.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{Instrument, info_span};

use worklens_types::state::{InsightMode, QuestionBranch, TurnState};

use crate::llm::{BoxLlmProvider, complete_structured_over};
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

const CLASSIFY_SYSTEM_PROMPT: &str = r#"Classify the user's latest question about their tracked computer activity.

branch:
- "data_query": a fresh question answerable by querying the activity database (time spent, apps used, input volume, sessions).
- "follow_up": a continuation of the previous data question ("and yesterday?", "split that by app", "why is that so high?").
- "general_qa": anything else, including questions about the assistant itself or how tracking works.

insight_mode, the analytical intent behind the question:
- "descriptive": what happened.
- "diagnostic": why it happened.
- "predictive": what is likely to happen.
- "prescriptive": what the user should do about it.

Use the whole conversation to decide; a short question after a data answer is usually a follow_up.
Respond with a single JSON object."#;

/// Structured classification outcome.
#[derive(Debug, Deserialize, JsonSchema)]
struct Classification {
    branch: QuestionBranch,
    insight_mode: InsightMode,
}

pub struct ClassifyNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl ClassifyNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for ClassifyNode {
    fn name(&self) -> &'static str {
        node_name::CLASSIFY
    }

    fn label(&self) -> &'static str {
        "classify question"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let span = info_span!(
            "gen_ai.classify",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );

        let parsed: Classification = complete_structured_over(
            &self.provider,
            &self.model,
            "Classification",
            CLASSIFY_SYSTEM_PROMPT,
            super::llm_history(&state),
        )
        .instrument(span)
        .await?;

        tracing::debug!(
            thread_id = %state.thread_id,
            branch = %parsed.branch,
            insight_mode = ?parsed.insight_mode,
            "question classified"
        );

        state.branch = Some(parsed.branch);
        state.insight_mode = Some(parsed.insight_mode);
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::canned_provider;

    #[tokio::test]
    async fn sets_branch_and_insight_mode() {
        let provider = canned_provider(r#"{"branch":"data_query","insight_mode":"descriptive"}"#);
        let node = ClassifyNode::new(provider, "classify-model");

        let mut state = TurnState::new("1", "how long did I code today?");
        state.push_user_message("how long did I code today?");
        let state = node.run(state).await.unwrap();

        assert_eq!(state.branch, Some(QuestionBranch::DataQuery));
        assert_eq!(state.insight_mode, Some(InsightMode::Descriptive));
    }

    #[tokio::test]
    async fn malformed_classification_fails_the_node() {
        let provider = canned_provider("certainly! here is my classification:");
        let node = ClassifyNode::new(provider, "classify-model");

        let result = node.run(TurnState::new("1", "q")).await;
        assert!(matches!(result, Err(NodeError::Llm(_))));
    }

    #[test]
    fn prompt_describes_every_branch() {
        for token in ["data_query", "follow_up", "general_qa", "descriptive", "prescriptive"] {
            assert!(CLASSIFY_SYSTEM_PROMPT.contains(token));
        }
    }
}
