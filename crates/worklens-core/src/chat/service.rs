//! Conversation management service.
//!
//! Everything here reads or mutates persisted conversation data without
//! running the pipeline: thread ids, listings, history, rename, delete, and
//! answer feedback. Message history comes from the latest checkpoint, so a
//! paused turn's messages are visible too.

use std::sync::Arc;

use uuid::Uuid;

use worklens_types::checkpoint::{ChatFeedback, ChatMeta};
use worklens_types::error::ChatError;
use worklens_types::llm::MessageRole;
use worklens_types::state::ChatMessage;

use crate::repository::{ChatRepository, CheckpointRepository};

/// Feedback form fields for one answer.
#[derive(Debug, Clone, Default)]
pub struct FeedbackInput {
    pub data_correct: Option<bool>,
    pub question_answered: Option<bool>,
    pub comment: Option<String>,
}

pub struct ChatService<C, K> {
    chats: Arc<C>,
    checkpoints: Arc<K>,
}

impl<C: ChatRepository, K: CheckpointRepository> ChatService<C, K> {
    pub fn new(chats: Arc<C>, checkpoints: Arc<K>) -> Self {
        Self { chats, checkpoints }
    }

    /// Allocate the next thread id: numeric ids count up from "1".
    ///
    /// The id is not reserved; the metadata row appears when the first turn
    /// runs. Non-numeric ids (externally chosen) are ignored for numbering.
    pub async fn next_thread_id(&self) -> Result<String, ChatError> {
        let threads = self.chats.list().await?;
        let max = threads
            .iter()
            .filter_map(|meta| meta.thread_id.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        Ok((max + 1).to_string())
    }

    /// All threads, most recently active first.
    pub async fn list(&self) -> Result<Vec<ChatMeta>, ChatError> {
        Ok(self.chats.list().await?)
    }

    /// Message history from the latest checkpoint, system preamble excluded.
    pub async fn history(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        let checkpoint = self
            .checkpoints
            .latest(thread_id)
            .await?
            .ok_or(ChatError::NotFound)?;
        Ok(checkpoint.state.visible_messages().cloned().collect())
    }

    pub async fn rename(&self, thread_id: &str, title: &str) -> Result<(), ChatError> {
        let title = title.trim();
        self.chats.set_title(thread_id, title).await.map_err(|e| {
            match e {
                worklens_types::error::RepositoryError::NotFound => ChatError::NotFound,
                other => ChatError::Repository(other),
            }
        })?;
        tracing::info!(thread_id = %thread_id, title = %title, "chat renamed");
        Ok(())
    }

    /// Remove a conversation entirely: checkpoints, metadata, everything.
    pub async fn delete(&self, thread_id: &str) -> Result<(), ChatError> {
        self.checkpoints.delete_thread(thread_id).await?;
        self.chats.delete(thread_id).await?;
        tracing::info!(thread_id = %thread_id, "chat deleted");
        Ok(())
    }

    /// Record feedback on a delivered answer.
    ///
    /// The referenced message must exist in the thread's history and be an
    /// assistant message; its content is copied into the feedback row so
    /// the row stays meaningful if the chat is later deleted.
    pub async fn store_feedback(
        &self,
        thread_id: &str,
        message_id: Uuid,
        input: FeedbackInput,
    ) -> Result<Uuid, ChatError> {
        let checkpoint = self
            .checkpoints
            .latest(thread_id)
            .await?
            .ok_or(ChatError::NotFound)?;

        let message = checkpoint
            .state
            .messages
            .iter()
            .find(|m| m.id == message_id && m.role == MessageRole::Assistant)
            .ok_or(ChatError::MessageNotFound)?;

        let mut feedback = ChatFeedback::new(thread_id, Some(message_id), &message.content);
        feedback.data_correct = input.data_correct;
        feedback.question_answered = input.question_answered;
        feedback.comment = input.comment;

        let feedback_id = feedback.id;
        self.chats.save_feedback(&feedback).await?;
        tracing::info!(
            thread_id = %thread_id,
            message_id = %message_id,
            feedback_id = %feedback_id,
            "answer feedback stored"
        );
        Ok(feedback_id)
    }
}
