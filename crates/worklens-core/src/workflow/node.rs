//! Node contract and the type-erased registry the engine executes from.
//!
//! A node is a named step function `TurnState -> TurnState`. Concrete nodes
//! are structs holding their collaborators (provider handle, store, sink);
//! the registry erases them behind `BoxNode` using the same blanket-impl
//! pattern as `BoxLlmProvider`.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

use thiserror::Error;
use worklens_types::error::AnalyticsError;
use worklens_types::llm::LlmError;
use worklens_types::state::TurnState;

/// Failure inside a node. Fatal to the current turn; the engine writes no
/// checkpoint for the failed node. Plot failures are not represented here:
/// they are recorded in the state and recovered by the retry loop.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error("precondition not met: {0}")]
    Precondition(String),
}

/// One step of the turn pipeline.
///
/// `run` takes the state by value and returns the updated state, so a node
/// can never observe another node's half-applied writes. Nodes must
/// tolerate fields they would normally compute being pre-populated
/// (resume patches arrive that way) and skip the corresponding work.
///
/// Uses native async fn in traits (RPITIT, Rust 2024 edition); `BoxNode`
/// provides the object-safe form the registry stores.
pub trait Node: Send + Sync {
    /// Stable node name, as recorded in checkpoints and routing.
    fn name(&self) -> &'static str;

    /// Human-readable progress line for step events.
    fn label(&self) -> &'static str;

    fn run(
        &self,
        state: TurnState,
    ) -> impl Future<Output = Result<TurnState, NodeError>> + Send;
}

/// Object-safe version of [`Node`] with a boxed future.
pub trait NodeDyn: Send + Sync {
    fn name(&self) -> &'static str;

    fn label(&self) -> &'static str;

    fn run_boxed<'a>(
        &'a self,
        state: TurnState,
    ) -> Pin<Box<dyn Future<Output = Result<TurnState, NodeError>> + Send + 'a>>;
}

/// Blanket implementation: any `Node` automatically implements `NodeDyn`.
impl<T: Node> NodeDyn for T {
    fn name(&self) -> &'static str {
        Node::name(self)
    }

    fn label(&self) -> &'static str {
        Node::label(self)
    }

    fn run_boxed<'a>(
        &'a self,
        state: TurnState,
    ) -> Pin<Box<dyn Future<Output = Result<TurnState, NodeError>> + Send + 'a>> {
        Box::pin(self.run(state))
    }
}

/// Type-erased node.
pub struct BoxNode {
    inner: Box<dyn NodeDyn + Send + Sync>,
}

impl BoxNode {
    pub fn new<T: Node + 'static>(node: T) -> Self {
        Self {
            inner: Box::new(node),
        }
    }

    pub fn name(&self) -> &'static str {
        self.inner.name()
    }

    pub fn label(&self) -> &'static str {
        self.inner.label()
    }

    pub async fn run(&self, state: TurnState) -> Result<TurnState, NodeError> {
        self.inner.run_boxed(state).await
    }
}

/// Constructed-once table of node implementations, passed into the engine
/// at startup. No ambient global state; tests swap in scripted nodes.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: HashMap<&'static str, BoxNode>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Register a node under its own name. Replaces any previous entry.
    pub fn register<T: Node + 'static>(&mut self, node: T) {
        let boxed = BoxNode::new(node);
        self.nodes.insert(boxed.name(), boxed);
    }

    pub fn get(&self, name: &str) -> Option<&BoxNode> {
        self.nodes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.nodes.keys().copied()
    }
}
