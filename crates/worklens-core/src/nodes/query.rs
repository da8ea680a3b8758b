//! SQL generation and execution nodes.
//!
//! `write query` assembles the densest prompt of the pipeline: schema DDL
//! for the selected tables, activity filter rules, canned aggregation
//! templates, and time-grouping guidance, framed by an insight-mode-specific
//! objective. `execute query` runs the result under a hard timeout and
//! degrades to an error row instead of failing the turn, so the user always
//! gets an answer describing what happened.

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use tracing::{Instrument, info_span};

use worklens_types::llm::LlmError;
use worklens_types::state::{AggregationFeature, InsightMode, QuestionBranch, TimeScope, TurnState};

use crate::analytics::AnalyticsStore;
use crate::format::{rows_to_markdown, strip_code_fence};
use crate::llm::{BoxLlmProvider, complete_structured};
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

use super::aggregations;

/// Wall-clock cap on one SQL execution.
pub const QUERY_TIMEOUT_SECS: u64 = 180;

const ADJUST_SYSTEM_PROMPT: &str = r#"Decide whether a follow-up question needs a new SQL query or can reuse the previous one.

Previous query:
{last_query}

Reuse (adjust = false) when the question only reinterprets the same data: "why is that so high?", "is that a lot?", "summarize that".
Write a new query (adjust = true) when it changes what data is needed: a different time range, a different grouping, different activities or tables.

Respond with a single JSON object."#;

const SQL_SYSTEM_PROMPT: &str = r#"Write a single syntactically valid {dialect} SELECT query answering the user's question about their tracked computer activity.

{objective}

Schema of the available tables:

{table_info}

Rules:
- Query only the tables above; never invent tables or columns.
- Unless the question asks for a specific count, limit output to at most {top_k} rows.
- Timestamps are stored as ISO 8601 text; use sqlite date functions (date(), strftime()) on them.
- Return only the query, no explanation.
{activity_filter}
{time_grouping}
{aggregation_hint}"#;

fn objective(mode: InsightMode) -> &'static str {
    match mode {
        InsightMode::Descriptive => {
            "Objective: describe what happened. Aggregate the relevant \
             activity so totals, counts, and rankings are directly readable \
             from the result."
        }
        InsightMode::Diagnostic => {
            "Objective: explain why it happened. Surface the factors behind \
             the observation: include breakdowns, comparisons against \
             adjacent periods, and co-occurring activity."
        }
        InsightMode::Predictive => {
            "Objective: support a forecast. Return the historical series the \
             trend will be read from, grouped over time and ordered \
             chronologically."
        }
        InsightMode::Prescriptive => {
            "Objective: support a recommendation. Return the data that \
             exposes where behavior could change: outliers, imbalances, and \
             time sinks."
        }
    }
}

/// Apps whose windows carry browsing activity. When the user asks purely
/// about browsing, filtering on the process name beats the activity label,
/// which misses untagged browser time.
const BROWSER_PROCESSES: [&str; 10] = [
    "Brave Browser",
    "Firefox",
    "Microsoft Edge",
    "Google Chrome",
    "Safari",
    "Opera",
    "Opera GX",
    "Chromium",
    "Vivaldi",
    "Tor Browser",
];

fn is_browsing_only(activities: &[String]) -> bool {
    activities.len() == 2
        && activities.iter().any(|a| a == "WorkRelatedBrowsing")
        && activities.iter().any(|a| a == "WorkUnrelatedBrowsing")
}

fn activity_filter_line(state: &TurnState) -> String {
    if !state.tables.iter().any(|t| t == "window_activity") {
        return String::new();
    }
    if is_browsing_only(&state.activities) {
        format!(
            "- Filter column `processName` to include only: [{}]",
            BROWSER_PROCESSES.join(", ")
        )
    } else if !state.activities.is_empty() {
        format!(
            "- Filter column `activity` to include only: [{}]",
            state.activities.join(", ")
        )
    } else {
        "- DO NOT FILTER ACTIVITIES".to_string()
    }
}

fn time_grouping_line(scope: Option<TimeScope>) -> &'static str {
    match scope {
        None | Some(TimeScope::Session) => "",
        Some(TimeScope::Day) => {
            "- Group results by hours, or by sessions when the session table is included."
        }
        Some(TimeScope::Week) => "- Group results by days.",
        Some(TimeScope::Month) => "- Group results by weeks.",
    }
}

fn aggregation_hint(features: &[AggregationFeature]) -> String {
    if features.is_empty() {
        return String::new();
    }
    let mut hint =
        String::from("- Build on the following aggregation SQL templates where they apply:\n");
    for feature in features {
        hint.push_str(&format!(
            "\n-- Feature: {feature}\n{}\n",
            aggregations::sql_template(*feature)
        ));
    }
    hint.push_str(
        "\nAlias the {time_bucket} column after the grouping in use (hours -> `hour`, \
         days -> `day`, weeks -> `week`).",
    );
    hint
}

#[derive(Debug, Deserialize, JsonSchema)]
struct GeneratedQuery {
    /// Syntactically valid SQL query.
    query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
struct AdjustDecision {
    /// Whether the follow-up needs a freshly written query.
    adjust: bool,
}

// ---------------------------------------------------------------------------
// Adjustment decision
// ---------------------------------------------------------------------------

pub struct QueryAdjustNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
}

impl QueryAdjustNode {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

impl Node for QueryAdjustNode {
    fn name(&self) -> &'static str {
        node_name::CHECK_QUERY_ADJUST
    }

    fn label(&self) -> &'static str {
        "check query adjustment"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let last_query = state.last_query.as_deref().unwrap_or("none");
        let system = ADJUST_SYSTEM_PROMPT.replace("{last_query}", last_query);

        let span = info_span!(
            "gen_ai.check_query_adjustment",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: AdjustDecision = complete_structured(
            &self.provider,
            &self.model,
            "AdjustDecision",
            &system,
            &state.question,
        )
        .instrument(span)
        .await?;

        state.adjust_query = parsed.adjust;
        tracing::debug!(
            thread_id = %state.thread_id,
            adjust = state.adjust_query,
            "follow-up query adjustment decided"
        );
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// SQL generation
// ---------------------------------------------------------------------------

pub struct WriteQueryNode<A> {
    provider: Arc<BoxLlmProvider>,
    model: String,
    store: Arc<A>,
}

impl<A> WriteQueryNode<A> {
    pub fn new(provider: Arc<BoxLlmProvider>, model: impl Into<String>, store: Arc<A>) -> Self {
        Self {
            provider,
            model: model.into(),
            store,
        }
    }
}

impl<A: AnalyticsStore + 'static> Node for WriteQueryNode<A> {
    fn name(&self) -> &'static str {
        node_name::WRITE_QUERY
    }

    fn label(&self) -> &'static str {
        "write query"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        if state.branch == Some(QuestionBranch::FollowUp)
            && !state.adjust_query
            && state.last_query.is_some()
        {
            state.query = state.last_query.clone();
            tracing::debug!(thread_id = %state.thread_id, "follow-up reuses previous query");
            return Ok(state);
        }

        if state.tables.is_empty() {
            return Err(NodeError::Precondition(
                "no tables selected for SQL generation".into(),
            ));
        }

        let table_info = self.store.schema_overview(&state.tables).await?;
        let mode = state.insight_mode.unwrap_or(InsightMode::Descriptive);

        let system = SQL_SYSTEM_PROMPT
            .replace("{dialect}", "sqlite")
            .replace("{objective}", objective(mode))
            .replace("{table_info}", &table_info)
            .replace("{top_k}", &state.top_k.to_string())
            .replace("{activity_filter}", &activity_filter_line(&state))
            .replace("{time_grouping}", time_grouping_line(state.time_scope))
            .replace(
                "{aggregation_hint}",
                &aggregation_hint(&state.aggregation_features),
            );

        let span = info_span!(
            "gen_ai.write_query",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let parsed: GeneratedQuery = complete_structured(
            &self.provider,
            &self.model,
            "GeneratedQuery",
            &system,
            &state.question,
        )
        .instrument(span)
        .await?;

        let query = strip_code_fence(&parsed.query);
        tracing::debug!(thread_id = %state.thread_id, query = %query, "query written");
        state.query = Some(query);
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// Runs the generated SQL read-only against the activity database.
///
/// Failures degrade into the result fields rather than failing the node:
/// the answer stage then explains the failure conversationally. A re-entry
/// after resume skips execution when a result is already present (the
/// approval patch may have replaced it).
pub struct ExecuteQueryNode<A> {
    store: Arc<A>,
    timeout: Duration,
}

impl<A> ExecuteQueryNode<A> {
    pub fn new(store: Arc<A>) -> Self {
        Self::with_timeout(store, Duration::from_secs(QUERY_TIMEOUT_SECS))
    }

    pub fn with_timeout(store: Arc<A>, timeout: Duration) -> Self {
        Self { store, timeout }
    }
}

impl<A: AnalyticsStore + 'static> Node for ExecuteQueryNode<A> {
    fn name(&self) -> &'static str {
        node_name::EXECUTE_QUERY
    }

    fn label(&self) -> &'static str {
        "execute query"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        if state.raw_result.is_some() {
            return Ok(state);
        }

        let Some(query) = state.query.clone() else {
            return Err(NodeError::Precondition(
                "no query available to execute".into(),
            ));
        };

        match tokio::time::timeout(self.timeout, self.store.run_select(&query)).await {
            Ok(Ok(rows)) => {
                let formatted = rows_to_markdown(&rows);
                tracing::debug!(
                    thread_id = %state.thread_id,
                    rows = rows.as_array().map(Vec::len).unwrap_or(0),
                    "query executed"
                );
                state.set_query_result(rows, formatted);
            }
            Ok(Err(e)) => {
                tracing::warn!(thread_id = %state.thread_id, error = %e, "query failed");
                state.set_query_result(
                    serde_json::json!([]),
                    vec![format!("Query execution failed: {e}")],
                );
            }
            Err(_) => {
                tracing::warn!(thread_id = %state.thread_id, "query timed out");
                state.set_query_result(
                    serde_json::json!([]),
                    vec!["Query execution exceeded 3 minutes and was aborted.".to_string()],
                );
            }
        }

        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// Out-of-band correction
// ---------------------------------------------------------------------------

/// Rewrite a paused query per the user's instruction.
///
/// Serves the correction endpoint while a turn waits at the approval gate;
/// not a pipeline node.
pub async fn correct_query(
    provider: &BoxLlmProvider,
    model: &str,
    query: &str,
    instruction: &str,
) -> Result<String, LlmError> {
    const CORRECT_SYSTEM_PROMPT: &str = r#"Rewrite the SQL query following the user's instruction.

Keep the dialect (sqlite), tables, and columns as they are unless the instruction changes them. Return only the corrected query."#;

    let user = format!("Query:\n{query}\n\nInstruction: {instruction}");
    let span = info_span!(
        "gen_ai.correct_query",
        gen_ai.request.model = %model,
    );
    let parsed: GeneratedQuery =
        complete_structured(provider, model, "GeneratedQuery", CORRECT_SYSTEM_PROMPT, &user)
            .instrument(span)
            .await?;
    Ok(strip_code_fence(&parsed.query))
}
