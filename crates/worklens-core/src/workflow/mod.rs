//! Turn workflow: the routing graph, node abstraction, and the
//! checkpointing execution engine.
//!
//! - [`graph`]: node names, edges, and the deterministic routing function.
//! - [`node`]: the [`node::Node`] trait, boxed form, and the registry.
//! - [`engine`]: drives a state through the graph, persisting a checkpoint
//!   after every node and pausing at the approval gate.

pub mod engine;
pub mod graph;
pub mod node;

pub use engine::{Engine, EngineError, TurnOutcome};
pub use graph::TurnGraph;
pub use node::{BoxNode, Node, NodeError, NodeRegistry};
