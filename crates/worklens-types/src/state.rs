//! Per-turn pipeline state and its routing enums.
//!
//! [`TurnState`] is the single mutable record threaded through every node of
//! one conversation turn. It is a fixed-schema struct (no dynamic field
//! lookups): every field a node may read or write is declared here, optional
//! where a node upstream may not have produced it yet. A checkpoint is a
//! complete JSON serialization of this struct, so nothing in it may reference
//! external mutable context.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::llm::MessageRole;

// ---------------------------------------------------------------------------
// Routing enums
// ---------------------------------------------------------------------------

/// Classification outcome for an inbound question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum QuestionBranch {
    /// A fresh question answerable from the activity database.
    DataQuery,
    /// A question about the assistant itself or anything off-data.
    GeneralQa,
    /// A continuation of the previous data question.
    FollowUp,
}

impl fmt::Display for QuestionBranch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionBranch::DataQuery => write!(f, "data_query"),
            QuestionBranch::GeneralQa => write!(f, "general_qa"),
            QuestionBranch::FollowUp => write!(f, "follow_up"),
        }
    }
}

impl FromStr for QuestionBranch {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "data_query" => Ok(QuestionBranch::DataQuery),
            "general_qa" => Ok(QuestionBranch::GeneralQa),
            "follow_up" => Ok(QuestionBranch::FollowUp),
            other => Err(format!("invalid question branch: '{other}'")),
        }
    }
}

/// Analytical register the answer should be written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum InsightMode {
    /// What happened.
    Descriptive,
    /// Why it happened.
    Diagnostic,
    /// What will happen.
    Predictive,
    /// What should be done.
    Prescriptive,
}

/// Whether the user asked for a chart alongside the answer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum WantsPlot {
    Yes,
    No,
    /// Let the model decide after seeing the query result.
    #[default]
    Auto,
}

/// How verbose the generated answer should be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerDetail {
    Low,
    High,
    #[default]
    Auto,
}

/// Time window a data question is scoped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TimeScope {
    Session,
    Day,
    Week,
    Month,
}

/// Behavioral metric the query should aggregate, selected during scoping.
///
/// Each variant maps to a canned SQL pattern over the high-volume tracking
/// tables; the query-writing node injects the pattern as guidance rather
/// than asking the model to invent window functions from scratch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AggregationFeature {
    /// How often the user switched between activity categories.
    ContextSwitch,
    /// Total time per app and activity.
    TotalFocusTime,
    /// Total time per activity category.
    CategoryBuckets,
    /// Raw keystroke, click, mouse, and scroll volume.
    InputActivityVolume,
    /// Continuous typing bursts separated by pauses over a minute.
    TypingStreaks,
    /// Typing breaks of five minutes or more.
    TypingGaps,
    /// Input volume broken down by app and activity.
    UserInputByApp,
    /// Average keystrokes per second over the period.
    TypingDensity,
    /// Share of tracked time spent in a given set of categories.
    ActivityCategoryRatio,
    /// Keystrokes per second during focus-related activities.
    TypingProductivity,
}

impl fmt::Display for AggregationFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregationFeature::ContextSwitch => "context_switch",
            AggregationFeature::TotalFocusTime => "total_focus_time",
            AggregationFeature::CategoryBuckets => "category_buckets",
            AggregationFeature::InputActivityVolume => "input_activity_volume",
            AggregationFeature::TypingStreaks => "typing_streaks",
            AggregationFeature::TypingGaps => "typing_gaps",
            AggregationFeature::UserInputByApp => "user_input_by_app",
            AggregationFeature::TypingDensity => "typing_density",
            AggregationFeature::ActivityCategoryRatio => "activity_category_ratio",
            AggregationFeature::TypingProductivity => "typing_productivity",
        };
        write!(f, "{name}")
    }
}

// ---------------------------------------------------------------------------
// Conversation messages
// ---------------------------------------------------------------------------

/// Provenance attached to an assistant message so clients can re-display
/// which tables, filters, and query produced it, plus the rendered chart
/// when one exists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plot_base64: Option<String>,
}

/// One message in the persisted conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub role: MessageRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<MessageMeta>,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content, None)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content, None)
    }

    pub fn assistant(content: impl Into<String>, meta: Option<MessageMeta>) -> Self {
        Self::new(MessageRole::Assistant, content, meta)
    }

    fn new(role: MessageRole, content: impl Into<String>, meta: Option<MessageMeta>) -> Self {
        Self {
            id: Uuid::now_v7(),
            role,
            content: content.into(),
            meta,
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TurnState
// ---------------------------------------------------------------------------

/// The mutable record threaded through every node of one conversation turn.
///
/// Owned exclusively by the execution engine for the duration of a turn;
/// each node takes it by value and returns the updated record. Serialized
/// in full after every node as the checkpoint payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnState {
    /// Conversation key, stable across turns.
    pub thread_id: String,
    /// Ordered history: system preamble (slot 0), then user/assistant turns.
    pub messages: Vec<ChatMessage>,
    /// The question driving this turn.
    pub question: String,
    /// Whether chat metadata already carries a title for this thread.
    pub title_exists: bool,
    /// Classification outcome; `None` until the classify node ran.
    pub branch: Option<QuestionBranch>,
    /// Analytical register chosen during classification.
    pub insight_mode: Option<InsightMode>,
    /// Wall-clock time captured when the turn was seeded (RFC 3339).
    pub current_time: String,
    /// Tables selected for the query.
    pub tables: Vec<String>,
    /// Activity category filters selected for the query.
    pub activities: Vec<String>,
    /// Time window the question is scoped to.
    pub time_scope: Option<TimeScope>,
    /// Aggregation patterns chosen during scoping; empty when the question
    /// needs no canned aggregation.
    pub aggregation_features: Vec<AggregationFeature>,
    /// Generated SQL for this turn.
    pub query: Option<String>,
    /// SQL from the previous turn, reused by follow-ups that need no new query.
    pub last_query: Option<String>,
    /// Whether a follow-up needs a freshly written query.
    pub adjust_query: bool,
    /// Raw tabular query result (array of row objects).
    pub raw_result: Option<Value>,
    /// Markdown renderings of `raw_result`, kept in lock-step with it.
    pub result: Vec<String>,
    /// Final answer text once a terminal node ran.
    pub answer: Option<String>,
    /// Row cap hint for the generated query.
    pub top_k: u32,
    pub wants_plot: WantsPlot,
    pub answer_detail: AnswerDetail,
    /// Caller pre-authorized automatic SQL execution for this turn.
    pub auto_sql: bool,
    /// Server-side blanket approval; pauses are skipped only when both
    /// `auto_sql` and `auto_approve` hold.
    pub auto_approve: bool,
    /// Most recently generated plotting script.
    pub plot_code: Option<String>,
    /// Path of the rendered artifact, if any.
    pub plot_path: Option<String>,
    /// Rendered artifact as a `data:image/png;base64,...` URI.
    pub plot_base64: Option<String>,
    /// Last plot failure; cleared on success.
    pub plot_error: Option<String>,
    /// Bounded at [`TurnState::MAX_PLOT_ATTEMPTS`]; incremented only by the
    /// plot-generation node.
    pub plot_attempts: u32,
}

impl Default for TurnState {
    fn default() -> Self {
        Self {
            thread_id: String::new(),
            messages: Vec::new(),
            question: String::new(),
            title_exists: false,
            branch: None,
            insight_mode: None,
            current_time: String::new(),
            tables: Vec::new(),
            activities: Vec::new(),
            time_scope: None,
            aggregation_features: Vec::new(),
            query: None,
            last_query: None,
            adjust_query: false,
            raw_result: None,
            result: Vec::new(),
            answer: None,
            top_k: 50,
            wants_plot: WantsPlot::Auto,
            answer_detail: AnswerDetail::Auto,
            auto_sql: false,
            auto_approve: false,
            plot_code: None,
            plot_path: None,
            plot_base64: None,
            plot_error: None,
            plot_attempts: 0,
        }
    }
}

impl TurnState {
    /// Hard cap on plot regeneration attempts.
    pub const MAX_PLOT_ATTEMPTS: u32 = 3;

    /// Seed a fresh turn for a thread. History and options are layered on by
    /// the caller.
    pub fn new(thread_id: impl Into<String>, question: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            question: question.into(),
            current_time: Utc::now().to_rfc3339(),
            ..Self::default()
        }
    }

    /// Replace the system preamble, or insert it at slot 0 if absent.
    ///
    /// The history holds at most one system message and it always sits at
    /// position zero; routing-context changes go through here so the
    /// invariant cannot drift.
    pub fn upsert_system_preamble(&mut self, content: impl Into<String>) {
        let content = content.into();
        match self.messages.first_mut() {
            Some(first) if first.role == MessageRole::System => {
                first.content = content;
            }
            _ => {
                self.messages.insert(0, ChatMessage::system(content));
            }
        }
    }

    /// Write the query result and its markdown rendering together.
    ///
    /// `raw_result` and `result` must never diverge, so all writers go
    /// through this single setter.
    pub fn set_query_result(&mut self, raw: Value, formatted: Vec<String>) {
        self.raw_result = Some(raw);
        self.result = formatted;
    }

    pub fn push_user_message(&mut self, content: impl Into<String>) {
        self.messages.push(ChatMessage::user(content));
    }

    /// Append the assistant answer; returns the message id for chunk events.
    pub fn push_assistant_message(
        &mut self,
        content: impl Into<String>,
        meta: Option<MessageMeta>,
    ) -> Uuid {
        let msg = ChatMessage::assistant(content, meta);
        let id = msg.id;
        self.messages.push(msg);
        id
    }

    pub fn last_assistant_message(&self) -> Option<&ChatMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
    }

    /// History without the system preamble, for read-only history queries.
    pub fn visible_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages
            .iter()
            .filter(|m| m.role != MessageRole::System)
    }
}

// ---------------------------------------------------------------------------
// Resume patch
// ---------------------------------------------------------------------------

/// Partial-state merge applied on resume.
///
/// Built only through the constructors so a corrected result always arrives
/// with its markdown rendering (the `raw_result`/`result` pairing rule).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Vec<String>>,
}

impl StatePatch {
    /// Approval without correction: nothing to merge.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Human-corrected query result, paired with its rendering.
    pub fn with_result(raw: Value, formatted: Vec<String>) -> Self {
        Self {
            query: None,
            raw_result: Some(raw),
            result: Some(formatted),
        }
    }

    /// Edited SQL plus the result it produced.
    pub fn with_query_and_result(query: String, raw: Value, formatted: Vec<String>) -> Self {
        Self {
            query: Some(query),
            raw_result: Some(raw),
            result: Some(formatted),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.query.is_none() && self.raw_result.is_none() && self.result.is_none()
    }

    /// Merge into a state loaded from a checkpoint.
    pub fn apply(&self, state: &mut TurnState) {
        if let Some(query) = &self.query {
            state.query = Some(query.clone());
        }
        if let Some(raw) = &self.raw_result {
            let formatted = self.result.clone().unwrap_or_default();
            state.set_query_result(raw.clone(), formatted);
        }
    }
}

// ---------------------------------------------------------------------------
// Turn options
// ---------------------------------------------------------------------------

/// Caller-supplied options for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnOptions {
    /// Row cap hint for the generated query.
    pub top_k: u32,
    /// Skip the approval gate when the server also allows it.
    pub auto_sql: bool,
    pub answer_detail: AnswerDetail,
    pub wants_plot: WantsPlot,
}

impl Default for TurnOptions {
    fn default() -> Self {
        Self {
            top_k: 50,
            auto_sql: false,
            answer_detail: AnswerDetail::Auto,
            wants_plot: WantsPlot::Auto,
        }
    }
}
