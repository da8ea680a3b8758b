//! Checkpoint and chat-metadata records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::TurnState;

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// One durable snapshot of [`TurnState`], written after a node completes.
///
/// `id` is assigned by the store and strictly increases per thread, so the
/// latest checkpoint is always the one with the highest id. Recovery and
/// resume both key off that ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub thread_id: String,
    /// Name of the node that just completed.
    pub node: String,
    pub state: TurnState,
    pub created_at: DateTime<Utc>,
}

/// A checkpoint before the store assigned its id.
#[derive(Debug, Clone)]
pub struct NewCheckpoint {
    pub thread_id: String,
    pub node: String,
    pub state: TurnState,
}

impl NewCheckpoint {
    pub fn new(node: impl Into<String>, state: TurnState) -> Self {
        Self {
            thread_id: state.thread_id.clone(),
            node: node.into(),
            state,
        }
    }
}

// ---------------------------------------------------------------------------
// Chat metadata
// ---------------------------------------------------------------------------

/// Listing metadata for one conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMeta {
    pub thread_id: String,
    /// Generated on the first data question; `None` until then.
    pub title: Option<String>,
    pub last_activity: DateTime<Utc>,
}

impl ChatMeta {
    /// Title for display, with the placeholder used before one is generated.
    pub fn display_title(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => format!("New Chat [{}]", self.thread_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Feedback
// ---------------------------------------------------------------------------

/// User feedback on a delivered answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatFeedback {
    pub id: Uuid,
    pub thread_id: String,
    /// Message the feedback refers to, when the client still has its id.
    pub message_id: Option<Uuid>,
    pub message_content: String,
    pub data_correct: Option<bool>,
    pub question_answered: Option<bool>,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ChatFeedback {
    pub fn new(
        thread_id: impl Into<String>,
        message_id: Option<Uuid>,
        message_content: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            thread_id: thread_id.into(),
            message_id,
            message_content: message_content.into(),
            data_correct: None,
            question_answered: None,
            comment: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_title_falls_back_to_placeholder() {
        let meta = ChatMeta {
            thread_id: "4".into(),
            title: None,
            last_activity: Utc::now(),
        };
        assert_eq!(meta.display_title(), "New Chat [4]");

        let named = ChatMeta {
            title: Some("Coding time today".into()),
            ..meta
        };
        assert_eq!(named.display_title(), "Coding time today");
    }

    #[test]
    fn test_new_checkpoint_copies_thread_id_from_state() {
        let state = TurnState::new("9", "q");
        let cp = NewCheckpoint::new("classify", state);
        assert_eq!(cp.thread_id, "9");
        assert_eq!(cp.node, "classify");
    }

    #[test]
    fn test_checkpoint_serde_roundtrip() {
        let cp = Checkpoint {
            id: 17,
            thread_id: "2".into(),
            node: "execute_query".into(),
            state: TurnState::new("2", "q"),
            created_at: Utc::now(),
        };
        let json = serde_json::to_string(&cp).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, 17);
        assert_eq!(back.node, "execute_query");
        assert_eq!(back.state.thread_id, "2");
    }
}
