//! The seam between transport handlers and the engine.
//!
//! [`TurnService`] owns everything a transport should not: seeding a fresh
//! [`TurnState`] from the thread's latest checkpoint, keeping chat metadata
//! in step with activity, serializing concurrent turns on one thread, and
//! folding approval verdicts into resume patches. Handlers hand it a
//! question or a verdict and get back a [`TurnReply`].

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use worklens_types::checkpoint::ChatMeta;
use worklens_types::llm::MessageRole;
use worklens_types::state::{ChatMessage, StatePatch, TurnOptions, TurnState};

use crate::format::rows_to_markdown;
use crate::nodes::context::system_preamble;
use crate::repository::{ChatRepository, CheckpointRepository};
use crate::workflow::{Engine, EngineError, TurnOutcome};

// ---------------------------------------------------------------------------
// Reply and errors
// ---------------------------------------------------------------------------

/// What a turn request came back with.
#[derive(Debug)]
pub enum TurnReply {
    /// A terminal node ran; `message` is the freshly appended answer.
    Completed { message: ChatMessage },
    /// Execution is checkpointed at the approval gate. `query` is the SQL
    /// that ran and `data` its raw rows, for the client to review or edit.
    Paused { query: String, data: Value },
    /// The user declined the generated query. No state was written; the
    /// thread is still paused and can be resumed later.
    Rejected,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("turn completed without producing an assistant message")]
    MissingAnswer,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Drives turns for all threads against one engine.
///
/// Metadata writes are ordered so the pipeline can rely on them: the
/// thread's metadata row is upserted before the engine starts, which is
/// what lets the title node `set_title` on the very first turn of a
/// thread.
pub struct TurnService<C, K>
where
    C: ChatRepository,
    K: CheckpointRepository,
{
    engine: Engine<K>,
    chats: Arc<C>,
    checkpoints: Arc<K>,
    auto_approve: bool,
    /// One lock per thread id. A second question, approval, or correction
    /// for a thread waits for the in-flight turn instead of interleaving
    /// checkpoint writes with it.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl<C, K> TurnService<C, K>
where
    C: ChatRepository,
    K: CheckpointRepository,
{
    pub fn new(engine: Engine<K>, chats: Arc<C>, checkpoints: Arc<K>, auto_approve: bool) -> Self {
        Self {
            engine,
            chats,
            checkpoints,
            auto_approve,
            locks: DashMap::new(),
        }
    }

    /// Run a new question on `thread_id` from the entry node.
    #[tracing::instrument(skip_all, fields(thread_id))]
    pub async fn start_turn(
        &self,
        thread_id: &str,
        question: &str,
        options: TurnOptions,
    ) -> Result<TurnReply, TurnError> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;

        let title = self.touch_thread(thread_id).await;
        let state = self.seed_state(thread_id, question, title, options).await;

        let outcome = self.engine.start(state).await?;
        self.reply_from(outcome)
    }

    /// Apply the user's verdict on the executed query.
    ///
    /// A rejection writes nothing and leaves the thread parked at the gate.
    /// An approval resumes from the gate checkpoint; when `data` is given,
    /// the user's (possibly hand-edited) rows replace the executed result.
    #[tracing::instrument(skip_all, fields(thread_id, approved))]
    pub async fn resume_turn(
        &self,
        thread_id: &str,
        approved: bool,
        data: Option<Value>,
    ) -> Result<TurnReply, TurnError> {
        if !approved {
            tracing::info!(thread_id, "query rejected; thread stays paused");
            return Ok(TurnReply::Rejected);
        }

        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;

        let patch = match data {
            Some(rows) => {
                let formatted = rows_to_markdown(&rows);
                StatePatch::with_result(rows, formatted)
            }
            None => StatePatch::empty(),
        };

        let outcome = self.engine.resume(thread_id, &patch).await?;
        self.reply_from(outcome)
    }

    /// Resume a paused thread with a replacement query and its rows, after
    /// the user corrected and re-ran the SQL out of band.
    #[tracing::instrument(skip_all, fields(thread_id))]
    pub async fn confirm_query(
        &self,
        thread_id: &str,
        query: String,
        data: Value,
    ) -> Result<TurnReply, TurnError> {
        let lock = self.lock_for(thread_id);
        let _guard = lock.lock().await;

        let formatted = rows_to_markdown(&data);
        let patch = StatePatch::with_query_and_result(query, data, formatted);

        let outcome = self.engine.resume(thread_id, &patch).await?;
        self.reply_from(outcome)
    }

    fn lock_for(&self, thread_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(thread_id.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Refresh the thread's activity timestamp, creating the metadata row
    /// if this is its first turn. Returns the preserved title.
    ///
    /// Metadata is advisory; a failed read or write is logged and the turn
    /// proceeds without it.
    async fn touch_thread(&self, thread_id: &str) -> Option<String> {
        let title = match self.chats.get(thread_id).await {
            Ok(meta) => meta.and_then(|m| m.title),
            Err(e) => {
                tracing::warn!(thread_id, error = %e, "chat metadata read failed");
                None
            }
        };

        let meta = ChatMeta {
            thread_id: thread_id.to_string(),
            title: title.clone(),
            last_activity: Utc::now(),
        };
        if let Err(e) = self.chats.upsert(&meta).await {
            tracing::warn!(thread_id, error = %e, "chat metadata upsert failed");
        }

        title
    }

    /// Build the state for a fresh turn: message history and the last
    /// executed query come from the thread's latest checkpoint, the title
    /// flag from metadata, the rest from the caller's options.
    async fn seed_state(
        &self,
        thread_id: &str,
        question: &str,
        title: Option<String>,
        options: TurnOptions,
    ) -> TurnState {
        let mut state = TurnState::new(thread_id, question);

        match self.checkpoints.latest(thread_id).await {
            Ok(Some(checkpoint)) => {
                state.messages = checkpoint.state.messages;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(
                    thread_id,
                    error = %e,
                    "checkpoint load failed; starting the turn with empty history"
                );
            }
        }

        state.last_query = state
            .messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .and_then(|m| m.meta.as_ref())
            .and_then(|meta| meta.query.clone());

        state.title_exists = title.as_deref().is_some_and(|t| !t.trim().is_empty());

        // The context node rewrites the preamble on data turns; seeding it
        // here keeps general questions covered too.
        let preamble = system_preamble(&state.current_time);
        state.upsert_system_preamble(preamble);
        state.push_user_message(question);

        state.top_k = options.top_k;
        state.auto_sql = options.auto_sql;
        state.answer_detail = options.answer_detail;
        state.wants_plot = options.wants_plot;
        state.auto_approve = self.auto_approve;

        state
    }

    fn reply_from(&self, outcome: TurnOutcome) -> Result<TurnReply, TurnError> {
        match outcome {
            TurnOutcome::Completed(state) => {
                let message = state
                    .last_assistant_message()
                    .cloned()
                    .ok_or(TurnError::MissingAnswer)?;
                Ok(TurnReply::Completed { message })
            }
            TurnOutcome::Paused(state) => Ok(TurnReply::Paused {
                query: state.query.unwrap_or_default(),
                data: state.raw_result.unwrap_or(Value::Null),
            }),
        }
    }
}
