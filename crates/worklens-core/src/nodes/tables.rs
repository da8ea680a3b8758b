//! Schema-scoping nodes: table selection, activity filters, and query scope.
//!
//! These three run back to back after routing context and narrow the search
//! space for SQL generation. Follow-ups that reuse the previous query skip
//! the first two; scope is re-derived every turn because the time window may
//! shift even when the query does not.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{Instrument, info_span};

use worklens_types::state::{AggregationFeature, QuestionBranch, TimeScope, TurnState};

use crate::analytics::AnalyticsStore;
use crate::llm::{BoxLlmProvider, complete_structured, complete_structured_over};
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

use super::aggregations;

const TABLES_SYSTEM_PROMPT: &str = r#"Pick the database tables needed to answer the user's question about their tracked computer activity.

Available tables:
- `window_activity`: one row per focused window interval, with app name, window title, activity category, start/end timestamps, and duration in seconds. The workhorse for time-spent and app-usage questions.
- `user_input`: periodic input telemetry with keystroke, click, mouse-movement, and scroll counts per interval. Needed for typing and input-effort questions.
- `session`: self-reported work sessions with start/end times and check-in ratings. Needed when the user talks about sessions or check-ins.

Select every table the query will touch and nothing else. Respond with a single JSON object."#;

const ACTIVITIES_SYSTEM_PROMPT: &str = r#"Pick the activity category labels relevant to the user's question.

The `activity` column of `window_activity` classifies each focused window into categories. Only the values listed below occur in this user's data; never invent others.

{activity_values}

Rules:
- Select only categories the question clearly refers to ("coding" selects the development categories, "browsing" the browsing ones).
- Select nothing when the question spans all activity ("what did I do today?"); an empty selection means no filter.

Respond with a single JSON object."#;

const SCOPE_SYSTEM_PROMPT: &str = r#"Determine the scope of the SQL query for the user's question.

time_scope, the approximate window the question covers, which decides grouping granularity:
- "session": a single work session or a few hours.
- "day": one day.
- "week": several days up to a week.
- "month": several weeks or more.

aggregation_features, zero or more canned metrics the query should build on. Pick one only when it matches the question directly; most questions need none.

{catalog}

Selected tables: {tables}

Respond with a single JSON object."#;

// ---------------------------------------------------------------------------
// Table selection
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct TableSelection {
    /// Names of tables in the activity database.
    tables: Vec<String>,
}

pub struct TablesNode<A> {
    provider: Arc<BoxLlmProvider>,
    model: String,
    store: Arc<A>,
}

impl<A> TablesNode<A> {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>, store: Arc<A>) -> Self {
        Self {
            provider,
            model: model.into(),
            store,
        }
    }
}

impl<A: AnalyticsStore + 'static> Node for TablesNode<A> {
    fn name(&self) -> &'static str {
        node_name::GET_TABLES
    }

    fn label(&self) -> &'static str {
        "get tables"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        if state.branch == Some(QuestionBranch::FollowUp) && !state.adjust_query {
            return Ok(state);
        }

        let known = self.store.table_names().await?;

        let span = info_span!(
            "gen_ai.get_tables",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: TableSelection = complete_structured_over(
            &self.provider,
            &self.model,
            "TableSelection",
            TABLES_SYSTEM_PROMPT,
            super::llm_history(&state),
        )
        .instrument(span)
        .await?;

        // Hallucinated names never reach SQL generation.
        state.tables = parsed
            .tables
            .into_iter()
            .filter(|t| known.iter().any(|k| k == t))
            .collect();

        tracing::debug!(thread_id = %state.thread_id, tables = ?state.tables, "tables selected");
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Activity filters
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct ActivitySelection {
    /// Activity labels to filter `window_activity` on; empty means no filter.
    activities: Vec<String>,
}

pub struct ActivitiesNode<A> {
    provider: Arc<BoxLlmProvider>,
    model: String,
    store: Arc<A>,
}

impl<A> ActivitiesNode<A> {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>, store: Arc<A>) -> Self {
        Self {
            provider,
            model: model.into(),
            store,
        }
    }
}

impl<A: AnalyticsStore + 'static> Node for ActivitiesNode<A> {
    fn name(&self) -> &'static str {
        node_name::EXTRACT_ACTIVITIES
    }

    fn label(&self) -> &'static str {
        "extract activities"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        if !state.tables.iter().any(|t| t == "window_activity") {
            return Ok(state);
        }
        if state.branch == Some(QuestionBranch::FollowUp) && !state.adjust_query {
            return Ok(state);
        }

        let known = self.store.activity_values().await?;
        let listing = known
            .iter()
            .map(|a| format!("- {a}"))
            .collect::<Vec<_>>()
            .join("\n");
        let system = ACTIVITIES_SYSTEM_PROMPT.replace("{activity_values}", &listing);

        let span = info_span!(
            "gen_ai.extract_activities",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: ActivitySelection = complete_structured_over(
            &self.provider,
            &self.model,
            "ActivitySelection",
            &system,
            super::llm_history(&state),
        )
        .instrument(span)
        .await?;

        state.activities = parsed
            .activities
            .into_iter()
            .filter(|a| known.iter().any(|k| k == a))
            .collect();

        tracing::debug!(
            thread_id = %state.thread_id,
            activities = ?state.activities,
            "activity filters selected"
        );
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Query scope
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
struct QueryScope {
    time_scope: TimeScope,
    /// Canned metrics the query should build on; empty for plain questions.
    #[serde(default)]
    aggregation_features: Vec<AggregationFeature>,
}

/// Runs for every data turn, including query-reusing follow-ups: the time
/// window can change ("and last week?") even when the SQL does not.
pub struct ScopeNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl ScopeNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for ScopeNode {
    fn name(&self) -> &'static str {
        node_name::GET_SCOPE
    }

    fn label(&self) -> &'static str {
        "get scope"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let system = SCOPE_SYSTEM_PROMPT
            .replace("{catalog}", &aggregations::catalog())
            .replace("{tables}", &state.tables.join(", "));

        let span = info_span!(
            "gen_ai.get_scope",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: QueryScope = complete_structured(
            &self.provider,
            &self.model,
            "QueryScope",
            &system,
            &state.question,
        )
        .instrument(span)
        .await?;

        state.time_scope = Some(parsed.time_scope);
        state.aggregation_features = parsed.aggregation_features;

        tracing::debug!(
            thread_id = %state.thread_id,
            time_scope = ?state.time_scope,
            features = ?state.aggregation_features,
            "query scope determined"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::tests::{canned_provider, fixed_store};

    fn data_query_state(question: &str) -> TurnState {
        let mut state = TurnState::new("1", question);
        state.branch = Some(QuestionBranch::DataQuery);
        state.push_user_message(question);
        state
    }

    #[tokio::test]
    async fn keeps_only_known_tables() {
        let provider =
            canned_provider(r#"{"tables":["window_activity","made_up_table","session"]}"#);
        let node = TablesNode::new(provider, "selection-model", fixed_store());

        let state = node
            .run(data_query_state("how long did I code today?"))
            .await
            .unwrap();
        assert_eq!(state.tables, vec!["window_activity", "session"]);
    }

    #[tokio::test]
    async fn follow_up_without_adjustment_skips_table_selection() {
        let provider = canned_provider(r#"{"tables":["session"]}"#);
        let node = TablesNode::new(provider, "selection-model", fixed_store());

        let mut state = data_query_state("and yesterday?");
        state.branch = Some(QuestionBranch::FollowUp);
        state.adjust_query = false;
        state.tables = vec!["window_activity".into()];

        let state = node.run(state).await.unwrap();
        assert_eq!(state.tables, vec!["window_activity"]);
    }

    #[tokio::test]
    async fn activities_skip_without_window_activity_table() {
        let provider = canned_provider(r#"{"activities":["Coding"]}"#);
        let node = ActivitiesNode::new(provider, "selection-model", fixed_store());

        let mut state = data_query_state("how many sessions did I log?");
        state.tables = vec!["session".into()];

        let state = node.run(state).await.unwrap();
        assert!(state.activities.is_empty());
    }

    #[tokio::test]
    async fn activities_filtered_to_observed_values() {
        let provider = canned_provider(r#"{"activities":["Coding","Gaming"]}"#);
        let node = ActivitiesNode::new(provider, "selection-model", fixed_store());

        let mut state = data_query_state("how long did I code?");
        state.tables = vec!["window_activity".into()];

        let state = node.run(state).await.unwrap();
        // fixed_store observes Coding but not Gaming.
        assert_eq!(state.activities, vec!["Coding"]);
    }

    #[tokio::test]
    async fn scope_sets_window_and_features() {
        let provider = canned_provider(
            r#"{"time_scope":"week","aggregation_features":["total_focus_time"]}"#,
        );
        let node = ScopeNode::new(provider, "selection-model");

        let mut state = data_query_state("where did my focus go last week?");
        state.tables = vec!["window_activity".into()];

        let state = node.run(state).await.unwrap();
        assert_eq!(state.time_scope, Some(TimeScope::Week));
        assert_eq!(
            state.aggregation_features,
            vec![AggregationFeature::TotalFocusTime]
        );
    }

    #[tokio::test]
    async fn scope_runs_even_for_query_reusing_follow_ups() {
        let provider = canned_provider(r#"{"time_scope":"day","aggregation_features":[]}"#);
        let node = ScopeNode::new(provider, "selection-model");

        let mut state = data_query_state("and yesterday?");
        state.branch = Some(QuestionBranch::FollowUp);
        state.adjust_query = false;
        state.time_scope = Some(TimeScope::Month);

        let state = node.run(state).await.unwrap();
        assert_eq!(state.time_scope, Some(TimeScope::Day));
    }

    #[test]
    fn scope_prompt_lists_every_feature() {
        let system = SCOPE_SYSTEM_PROMPT.replace("{catalog}", &aggregations::catalog());
        for feature in aggregations::ALL_FEATURES {
            assert!(system.contains(&feature.to_string()));
        }
    }
}
