//! Terminal answer nodes, the only stages that stream.
//!
//! Both allocate the assistant message id before the first token so every
//! chunk event carries the id the persisted message will have; clients key
//! their replace-by-id rendering on it. Chunk content is cumulative, not a
//! delta: a client that misses one event recovers fully on the next.

use std::sync::Arc;

use chrono::Utc;
use futures_util::StreamExt;
use tracing::{Instrument, info_span};
use uuid::Uuid;

use worklens_types::event::TurnEvent;
use worklens_types::llm::{CompletionRequest, LlmError, Message, StreamEvent};
use worklens_types::state::{
    AnswerDetail, ChatMessage, InsightMode, MessageMeta, QuestionBranch, TurnState,
};

use crate::event::EventSink;
use crate::format::normalize_latex;
use crate::llm::BoxLlmProvider;
use crate::workflow::graph::node_name;
use crate::workflow::node::{Node, NodeError};

const ANSWER_MAX_TOKENS: u32 = 4096;

const GENERAL_ANSWER_SYSTEM_PROMPT: &str = r#"You are WorkLens, a conversational assistant for a self-tracking tool that records computer activity locally: focused windows and apps, keyboard and mouse input volume, and self-reported work sessions. All data stays on the user's machine.

This question is not answerable from the activity data, so answer it directly. When asked about yourself or the tracking, explain what WorkLens records and that you can answer questions about it. Stay concise and friendly.

Current time: {current_time}"#;

const ANSWER_SYSTEM_PROMPT: &str = r#"You are WorkLens, answering a question about the user's tracked computer activity. The SQL query below was run against their local activity database and produced the result shown.

{objective}

Guidelines:
- Ground every number in the result; never invent data.
- Durations are in seconds unless a column says otherwise; convert to minutes or hours when that reads better.
- When the result is an error message instead of rows, say plainly that the query failed or timed out and offer to try a different angle.
{detail}
Current time: {current_time}"#;

fn objective(mode: InsightMode) -> &'static str {
    match mode {
        InsightMode::Descriptive => {
            "Describe what happened: report the totals, rankings, and \
             patterns the result shows."
        }
        InsightMode::Diagnostic => {
            "Explain why it happened: connect the breakdowns in the result \
             into likely causes, and say when the data only suggests rather \
             than proves."
        }
        InsightMode::Predictive => {
            "Project what is likely next: read the trend from the series in \
             the result and state the assumption behind the projection."
        }
        InsightMode::Prescriptive => {
            "Recommend what to do: turn the imbalances and time sinks in the \
             result into one or two concrete, small suggestions."
        }
    }
}

fn detail_line(detail: AnswerDetail) -> &'static str {
    match detail {
        AnswerDetail::Low => "- Keep the answer brief: a few sentences at most.\n",
        AnswerDetail::High => {
            "- Be thorough: cover each part of the result and what it implies.\n"
        }
        AnswerDetail::Auto => "",
    }
}

/// Drain a completion stream, emitting one cumulative chunk event per text
/// delta. Returns the full response text.
async fn stream_answer(
    provider: &BoxLlmProvider,
    request: CompletionRequest,
    sink: &Arc<dyn EventSink>,
    thread_id: &str,
    message_id: Uuid,
) -> Result<String, LlmError> {
    let mut stream = provider.stream(request);
    let mut content = String::new();

    while let Some(event) = stream.next().await {
        match event? {
            StreamEvent::TextDelta { text, .. } => {
                content.push_str(&text);
                sink.emit(TurnEvent::chunk(thread_id, message_id, content.clone()));
            }
            StreamEvent::Done => break,
            _ => {}
        }
    }

    Ok(content)
}

// ---------------------------------------------------------------------------
// Data answer
// ---------------------------------------------------------------------------

pub struct AnswerNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
    sink: Arc<dyn EventSink>,
}

impl AnswerNode {
    pub fn new(
        provider: Arc<BoxLlmProvider>,
        model: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            sink,
        }
    }
}

impl Node for AnswerNode {
    fn name(&self) -> &'static str {
        node_name::GENERATE_ANSWER
    }

    fn label(&self) -> &'static str {
        "generate answer"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let mode = state.insight_mode.unwrap_or(InsightMode::Descriptive);
        let system = ANSWER_SYSTEM_PROMPT
            .replace("{objective}", objective(mode))
            .replace("{detail}", detail_line(state.answer_detail))
            .replace("{current_time}", &state.current_time);

        let user = format!(
            "Question: {}\nSQL Query: {}\nSQL Result:\n{}",
            state.question,
            state.query.as_deref().unwrap_or("none"),
            state.result.join("\n\n"),
        );

        // Follow-ups answer inside the conversation; fresh questions get a
        // standalone prompt so stale history cannot bleed into the numbers.
        let request = if state.branch == Some(QuestionBranch::FollowUp) {
            let mut messages = super::llm_history(&state);
            messages.push(Message::user(user));
            CompletionRequest::text(&self.model, messages, ANSWER_MAX_TOKENS).with_system(&system)
        } else {
            CompletionRequest::text(&self.model, vec![Message::user(user)], ANSWER_MAX_TOKENS)
                .with_system(&system)
        };

        let message_id = Uuid::now_v7();
        let span = info_span!(
            "gen_ai.generate_answer",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let content = stream_answer(
            &self.provider,
            request,
            &self.sink,
            &state.thread_id,
            message_id,
        )
        .instrument(span)
        .await?;

        let answer = normalize_latex(&content);
        let meta = MessageMeta {
            tables: state.tables.clone(),
            activities: state.activities.clone(),
            query: state.query.clone(),
            result: state.raw_result.clone(),
            plot_path: state.plot_path.clone(),
            plot_base64: state.plot_base64.clone(),
        };

        state.messages.push(ChatMessage {
            id: message_id,
            role: worklens_types::llm::MessageRole::Assistant,
            content: answer.clone(),
            meta: Some(meta),
            created_at: Utc::now(),
        });
        state.answer = Some(answer);
        Ok(state)
    }
}

// ---------------------------------------------------------------------------
// General answer
// ---------------------------------------------------------------------------

/// Off-data terminal: no query context, full history, loose temperature.
pub struct GeneralAnswerNode {
    provider: Arc<BoxLlmProvider>,
    model: String,
    sink: Arc<dyn EventSink>,
}

impl GeneralAnswerNode {
    pub fn new(
        provider: Arc<BoxLlmProvider>,
        model: impl Into<String>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            sink,
        }
    }
}

impl Node for GeneralAnswerNode {
    fn name(&self) -> &'static str {
        node_name::GENERAL_ANSWER
    }

    fn label(&self) -> &'static str {
        "generate answer"
    }

    async fn run(&self, mut state: TurnState) -> Result<TurnState, NodeError> {
        let system =
            GENERAL_ANSWER_SYSTEM_PROMPT.replace("{current_time}", &state.current_time);
        let request =
            CompletionRequest::text(&self.model, super::llm_history(&state), ANSWER_MAX_TOKENS)
                .with_system(&system)
                .with_temperature(1.0);

        let message_id = Uuid::now_v7();
        let span = info_span!(
            "gen_ai.general_answer",
            gen_ai.system = self.provider.name(),
            gen_ai.request.model = %self.model,
        );
        let content = stream_answer(
            &self.provider,
            request,
            &self.sink,
            &state.thread_id,
            message_id,
        )
        .instrument(span)
        .await?;

        state.messages.push(ChatMessage {
            id: message_id,
            role: worklens_types::llm::MessageRole::Assistant,
            content: content.clone(),
            meta: None,
            created_at: Utc::now(),
        });
        state.answer = Some(content);
        Ok(state)
    }
}
