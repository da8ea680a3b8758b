//! Fixed routing topology for the turn pipeline.
//!
//! The graph is compiled into code: `next` is a total routing function over
//! (node, state), and the edge table below exists so construction can prove
//! the topology sound (every node reachable from the entry, every node able
//! to reach a terminal). The plot retry loop makes the graph cyclic, which
//! is fine; the cycle is bounded by the attempt counter, not the topology.

use std::collections::{HashMap, HashSet};

use petgraph::graph::DiGraph;
use petgraph::visit::{Dfs, Reversed};
use thiserror::Error;

use worklens_types::state::{QuestionBranch, TurnState, WantsPlot};

/// Virtual entry position, before any node has run.
pub const START: &str = "start";
/// Virtual terminal position.
pub const END: &str = "end";

/// Stable node names, as recorded in checkpoints.
pub mod node_name {
    pub const CLASSIFY: &str = "classify";
    pub const GENERATE_TITLE: &str = "generate_title";
    pub const GIVE_CONTEXT: &str = "give_context";
    pub const CHECK_QUERY_ADJUST: &str = "check_query_adjust";
    pub const GET_TABLES: &str = "get_tables";
    pub const EXTRACT_ACTIVITIES: &str = "extract_activities";
    pub const GET_SCOPE: &str = "get_scope";
    pub const WRITE_QUERY: &str = "write_query";
    pub const EXECUTE_QUERY: &str = "execute_query";
    pub const CHECK_PLOT_NEEDED: &str = "check_plot_needed";
    pub const CREATE_PLOT: &str = "create_plot";
    pub const RUN_PLOT: &str = "run_plot";
    pub const GENERAL_ANSWER: &str = "general_answer";
    pub const GENERATE_ANSWER: &str = "generate_answer";
}

/// Every node the registry must provide an implementation for.
pub const ALL_NODES: [&str; 14] = [
    node_name::CLASSIFY,
    node_name::GENERATE_TITLE,
    node_name::GIVE_CONTEXT,
    node_name::CHECK_QUERY_ADJUST,
    node_name::GET_TABLES,
    node_name::EXTRACT_ACTIVITIES,
    node_name::GET_SCOPE,
    node_name::WRITE_QUERY,
    node_name::EXECUTE_QUERY,
    node_name::CHECK_PLOT_NEEDED,
    node_name::CREATE_PLOT,
    node_name::RUN_PLOT,
    node_name::GENERAL_ANSWER,
    node_name::GENERATE_ANSWER,
];

/// The node after which the engine pauses for approval of generated SQL.
pub const DEFAULT_INTERRUPT: &str = node_name::EXECUTE_QUERY;

/// All possible transitions, conditional alternatives included. Used only
/// for topology validation; the selecting predicates live in [`TurnGraph::next`].
const EDGES: [(&str, &str); 20] = [
    (START, node_name::CLASSIFY),
    (node_name::CLASSIFY, node_name::GENERATE_TITLE),
    (node_name::CLASSIFY, node_name::GIVE_CONTEXT),
    (node_name::CLASSIFY, node_name::GENERAL_ANSWER),
    (node_name::GENERATE_TITLE, node_name::GIVE_CONTEXT),
    (node_name::GIVE_CONTEXT, node_name::GET_TABLES),
    (node_name::GIVE_CONTEXT, node_name::CHECK_QUERY_ADJUST),
    (node_name::CHECK_QUERY_ADJUST, node_name::GET_TABLES),
    (node_name::GET_TABLES, node_name::EXTRACT_ACTIVITIES),
    (node_name::EXTRACT_ACTIVITIES, node_name::GET_SCOPE),
    (node_name::GET_SCOPE, node_name::WRITE_QUERY),
    (node_name::WRITE_QUERY, node_name::EXECUTE_QUERY),
    (node_name::EXECUTE_QUERY, node_name::CREATE_PLOT),
    (node_name::EXECUTE_QUERY, node_name::CHECK_PLOT_NEEDED),
    (node_name::EXECUTE_QUERY, node_name::GENERATE_ANSWER),
    (node_name::CHECK_PLOT_NEEDED, node_name::CREATE_PLOT),
    (node_name::CHECK_PLOT_NEEDED, node_name::GENERATE_ANSWER),
    (node_name::CREATE_PLOT, node_name::RUN_PLOT),
    (node_name::RUN_PLOT, node_name::CREATE_PLOT),
    (node_name::RUN_PLOT, node_name::GENERATE_ANSWER),
];

/// Terminal nodes; after these the turn ends.
const TERMINALS: [&str; 2] = [node_name::GENERAL_ANSWER, node_name::GENERATE_ANSWER];

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("unknown node: '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' is not reachable from the entry")]
    Unreachable(&'static str),

    #[error("node '{0}' has no path to a terminal")]
    NoTerminalPath(&'static str),
}

/// The compiled routing topology.
///
/// Construction validates the edge table; `next` evaluates the conditional
/// predicates against the current state. Both are deterministic: identical
/// state field values always select the same successor.
pub struct TurnGraph {
    _validated: (),
}

impl TurnGraph {
    pub fn new() -> Result<Self, GraphError> {
        Self::validate()?;
        Ok(Self { _validated: () })
    }

    /// First node of every turn.
    pub fn entry(&self) -> &'static str {
        node_name::CLASSIFY
    }

    /// Successor of `current` given the state, or `None` at a terminal.
    pub fn next(
        &self,
        current: &str,
        state: &TurnState,
    ) -> Result<Option<&'static str>, GraphError> {
        use node_name::*;

        let next = match current {
            START => Some(CLASSIFY),
            CLASSIFY => match state.branch {
                Some(QuestionBranch::GeneralQa) => Some(GENERAL_ANSWER),
                Some(QuestionBranch::DataQuery) if !state.title_exists => Some(GENERATE_TITLE),
                _ => Some(GIVE_CONTEXT),
            },
            GENERATE_TITLE => Some(GIVE_CONTEXT),
            GIVE_CONTEXT => match state.branch {
                Some(QuestionBranch::DataQuery) => Some(GET_TABLES),
                _ => Some(CHECK_QUERY_ADJUST),
            },
            CHECK_QUERY_ADJUST => Some(GET_TABLES),
            GET_TABLES => Some(EXTRACT_ACTIVITIES),
            EXTRACT_ACTIVITIES => Some(GET_SCOPE),
            GET_SCOPE => Some(WRITE_QUERY),
            WRITE_QUERY => Some(EXECUTE_QUERY),
            EXECUTE_QUERY => match state.wants_plot {
                WantsPlot::Yes => Some(CREATE_PLOT),
                WantsPlot::Auto => Some(CHECK_PLOT_NEEDED),
                WantsPlot::No => Some(GENERATE_ANSWER),
            },
            // check_plot_needed resolves the tri-state to yes/no before this
            // predicate runs.
            CHECK_PLOT_NEEDED => match state.wants_plot {
                WantsPlot::Yes => Some(CREATE_PLOT),
                _ => Some(GENERATE_ANSWER),
            },
            CREATE_PLOT => Some(RUN_PLOT),
            RUN_PLOT => {
                if state.plot_error.is_some()
                    && state.plot_attempts < TurnState::MAX_PLOT_ATTEMPTS
                {
                    Some(CREATE_PLOT)
                } else {
                    Some(GENERATE_ANSWER)
                }
            }
            GENERAL_ANSWER | GENERATE_ANSWER => None,
            other => return Err(GraphError::UnknownNode(other.to_string())),
        };
        Ok(next)
    }

    /// Prove the edge table sound: every node reachable from START, every
    /// node able to reach END.
    fn validate() -> Result<(), GraphError> {
        let mut graph = DiGraph::<&'static str, ()>::new();
        let mut indices = HashMap::new();

        for name in [START, END].into_iter().chain(ALL_NODES) {
            indices.insert(name, graph.add_node(name));
        }
        for (from, to) in EDGES {
            graph.add_edge(indices[from], indices[to], ());
        }
        for terminal in TERMINALS {
            graph.add_edge(indices[terminal], indices[END], ());
        }

        let mut from_start = HashSet::new();
        let mut dfs = Dfs::new(&graph, indices[START]);
        while let Some(ix) = dfs.next(&graph) {
            from_start.insert(ix);
        }
        for name in ALL_NODES {
            if !from_start.contains(&indices[name]) {
                return Err(GraphError::Unreachable(name));
            }
        }

        let reversed = Reversed(&graph);
        let mut to_end = HashSet::new();
        let mut dfs = Dfs::new(reversed, indices[END]);
        while let Some(ix) = dfs.next(reversed) {
            to_end.insert(ix);
        }
        for name in ALL_NODES {
            if !to_end.contains(&indices[name]) {
                return Err(GraphError::NoTerminalPath(name));
            }
        }

        Ok(())
    }
}
