//! Events emitted while a turn executes.
//!
//! Every event carries the thread it belongs to so a single broadcast
//! channel can fan out to multiple subscribed clients; subscribers drop
//! events for threads they are not watching.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One progress event, tagged with its thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub thread_id: String,
    #[serde(flatten)]
    pub kind: TurnEventKind,
}

/// What happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEventKind {
    /// A node is about to run. `label` is the human-readable progress line.
    Step { node: String, label: String },
    /// Streamed answer text. `content` is cumulative (everything produced so
    /// far), so a client that misses a chunk recovers on the next one.
    Chunk { id: Uuid, content: String },
    /// The turn paused for approval of a generated query.
    Interruption { query: String, data: Value },
}

impl TurnEvent {
    pub fn step(
        thread_id: impl Into<String>,
        node: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind: TurnEventKind::Step {
                node: node.into(),
                label: label.into(),
            },
        }
    }

    pub fn chunk(thread_id: impl Into<String>, id: Uuid, content: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind: TurnEventKind::Chunk {
                id,
                content: content.into(),
            },
        }
    }

    pub fn interruption(
        thread_id: impl Into<String>,
        query: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            kind: TurnEventKind::Interruption {
                query: query.into(),
                data,
            },
        }
    }
}
