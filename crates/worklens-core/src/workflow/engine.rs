//! Execution engine: walks the routing graph, checkpoints after every node,
//! pauses at the approval gate, and re-enters on resume.
//!
//! One engine instance serves every conversation. The engine holds no
//! per-turn state; everything a suspended turn needs lives in its latest
//! checkpoint, so a resume can arrive much later or from a different
//! process instance.

use std::sync::Arc;

use thiserror::Error;

use worklens_types::checkpoint::NewCheckpoint;
use worklens_types::error::RepositoryError;
use worklens_types::event::TurnEvent;
use worklens_types::state::{StatePatch, TurnState};

use crate::event::EventSink;
use crate::repository::CheckpointRepository;

use super::graph::{DEFAULT_INTERRUPT, GraphError, TurnGraph};
use super::node::{NodeError, NodeRegistry};

// ---------------------------------------------------------------------------
// Outcome and errors
// ---------------------------------------------------------------------------

/// How a turn left the engine.
#[derive(Debug)]
pub enum TurnOutcome {
    /// A terminal node ran; the state carries the new assistant message.
    Completed(TurnState),
    /// The turn is suspended at the approval gate. The state (including the
    /// executed query and its preview rows) is checkpointed and in `.0`.
    Paused(TurnState),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("node '{node}' failed: {source}")]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("no implementation registered for node '{0}'")]
    MissingNode(String),

    #[error("no checkpoint found for thread '{0}'")]
    NoCheckpoint(String),

    #[error("thread '{thread_id}' is not paused at an approval point (last node: '{node}')")]
    InvalidResume { thread_id: String, node: String },

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error("checkpoint load failed: {0}")]
    CheckpointLoad(#[from] RepositoryError),
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine<C: CheckpointRepository> {
    registry: NodeRegistry,
    graph: TurnGraph,
    checkpoints: Arc<C>,
    sink: Arc<dyn EventSink>,
    interrupt_node: &'static str,
}

impl<C: CheckpointRepository> Engine<C> {
    /// Build an engine, checking that the registry implements every node
    /// the graph can route to.
    pub fn new(
        registry: NodeRegistry,
        graph: TurnGraph,
        checkpoints: Arc<C>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self, EngineError> {
        for name in super::graph::ALL_NODES {
            if !registry.contains(name) {
                return Err(EngineError::MissingNode(name.to_string()));
            }
        }
        Ok(Self {
            registry,
            graph,
            checkpoints,
            sink,
            interrupt_node: DEFAULT_INTERRUPT,
        })
    }

    /// Drive a freshly seeded state from the entry node to a terminal node
    /// or the approval gate.
    #[tracing::instrument(skip_all, fields(thread_id = %state.thread_id))]
    pub async fn start(&self, state: TurnState) -> Result<TurnOutcome, EngineError> {
        self.run_from(self.graph.entry(), state).await
    }

    /// Continue a suspended turn.
    ///
    /// Loads the latest checkpoint, requires it to sit at the approval
    /// gate, folds the patch into the loaded state, and re-enters the graph
    /// at the position immediately after the gate. An ineligible thread is
    /// reported without touching any stored state; the patch becomes
    /// durable at the first post-resume checkpoint.
    #[tracing::instrument(skip_all, fields(thread_id = %thread_id))]
    pub async fn resume(
        &self,
        thread_id: &str,
        patch: &StatePatch,
    ) -> Result<TurnOutcome, EngineError> {
        let checkpoint = self
            .checkpoints
            .latest(thread_id)
            .await?
            .ok_or_else(|| EngineError::NoCheckpoint(thread_id.to_string()))?;

        if checkpoint.node != self.interrupt_node {
            return Err(EngineError::InvalidResume {
                thread_id: thread_id.to_string(),
                node: checkpoint.node,
            });
        }

        let mut state = checkpoint.state;
        patch.apply(&mut state);

        match self.graph.next(self.interrupt_node, &state)? {
            Some(next) => self.run_from(next, state).await,
            None => Ok(TurnOutcome::Completed(state)),
        }
    }

    async fn run_from(
        &self,
        first: &'static str,
        mut state: TurnState,
    ) -> Result<TurnOutcome, EngineError> {
        let mut current = first;
        loop {
            let node = self
                .registry
                .get(current)
                .ok_or_else(|| EngineError::MissingNode(current.to_string()))?;

            self.sink
                .emit(TurnEvent::step(&state.thread_id, current, node.label()));

            tracing::debug!(thread_id = %state.thread_id, node = current, "running node");
            let thread_id = state.thread_id.clone();
            state = node.run(state).await.map_err(|source| {
                tracing::error!(
                    thread_id = %thread_id,
                    node = current,
                    error = %source,
                    "node failed; aborting turn"
                );
                EngineError::Node {
                    node: current.to_string(),
                    source,
                }
            })?;

            self.save_checkpoint(current, &state).await;

            if current == self.interrupt_node && !(state.auto_sql && state.auto_approve) {
                let query = state.query.clone().unwrap_or_default();
                let data = state
                    .raw_result
                    .clone()
                    .unwrap_or(serde_json::Value::Null);
                self.sink
                    .emit(TurnEvent::interruption(&state.thread_id, query, data));
                tracing::info!(thread_id = %state.thread_id, "turn paused for query approval");
                return Ok(TurnOutcome::Paused(state));
            }

            match self.graph.next(current, &state)? {
                Some(next) => current = next,
                None => {
                    tracing::info!(thread_id = %state.thread_id, terminal = current, "turn completed");
                    return Ok(TurnOutcome::Completed(state));
                }
            }
        }
    }

    /// Persist a checkpoint after a node completes.
    ///
    /// A write failure is logged and swallowed: the in-memory turn is still
    /// sound, only resumability falls behind. The log level and wording
    /// keep these distinguishable from node-logic failures.
    async fn save_checkpoint(&self, node: &str, state: &TurnState) {
        let checkpoint = NewCheckpoint::new(node, state.clone());
        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            tracing::warn!(
                thread_id = %state.thread_id,
                node,
                error = %e,
                "checkpoint write failed; turn continues but resume may fall behind"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventBus, NullSink};
    use crate::workflow::graph::node_name;
    use crate::workflow::node::Node;
    use serde_json::{Value, json};
    use std::future::Future;
    use std::sync::Mutex;
    use worklens_types::checkpoint::Checkpoint;
    use worklens_types::event::TurnEventKind;
    use worklens_types::state::{MessageMeta, QuestionBranch, WantsPlot};

    // -- scripted node plumbing ---------------------------------------------

    struct FnNode<F> {
        name: &'static str,
        label: &'static str,
        f: F,
    }

    impl<F, Fut> Node for FnNode<F>
    where
        F: Fn(TurnState) -> Fut + Send + Sync,
        Fut: Future<Output = Result<TurnState, NodeError>> + Send,
    {
        fn name(&self) -> &'static str {
            self.name
        }

        fn label(&self) -> &'static str {
            self.label
        }

        fn run(&self, state: TurnState) -> impl Future<Output = Result<TurnState, NodeError>> + Send {
            (self.f)(state)
        }
    }

    fn node<F, Fut>(name: &'static str, f: F) -> FnNode<F>
    where
        F: Fn(TurnState) -> Fut + Send + Sync,
        Fut: Future<Output = Result<TurnState, NodeError>> + Send,
    {
        FnNode {
            name,
            label: name,
            f,
        }
    }

    // -- in-memory checkpoint store -----------------------------------------

    #[derive(Default)]
    struct MemCheckpoints {
        rows: Mutex<Vec<Checkpoint>>,
    }

    impl MemCheckpoints {
        fn node_sequence(&self, thread_id: &str) -> Vec<String> {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.thread_id == thread_id)
                .map(|c| c.node.clone())
                .collect()
        }
    }

    impl CheckpointRepository for MemCheckpoints {
        async fn save(&self, checkpoint: &NewCheckpoint) -> Result<Checkpoint, RepositoryError> {
            let mut rows = self.rows.lock().unwrap();
            let saved = Checkpoint {
                id: rows.len() as i64 + 1,
                thread_id: checkpoint.thread_id.clone(),
                node: checkpoint.node.clone(),
                state: checkpoint.state.clone(),
                created_at: chrono::Utc::now(),
            };
            rows.push(saved.clone());
            Ok(saved)
        }

        async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, RepositoryError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|c| c.thread_id == thread_id)
                .cloned())
        }

        async fn delete_thread(&self, thread_id: &str) -> Result<(), RepositoryError> {
            self.rows
                .lock()
                .unwrap()
                .retain(|c| c.thread_id != thread_id);
            Ok(())
        }
    }

    // -- scripted pipeline ---------------------------------------------------

    /// Registry whose SQL stage yields `rows` and whose plot run fails
    /// `plot_failures` times before succeeding.
    fn scripted_registry(rows: Value, plot_failures: u32) -> NodeRegistry {
        let mut registry = NodeRegistry::new();

        registry.register(node(node_name::CLASSIFY, |mut s: TurnState| async move {
            s.branch = Some(if s.question.contains("yourself") {
                QuestionBranch::GeneralQa
            } else {
                QuestionBranch::DataQuery
            });
            Ok(s)
        }));
        registry.register(node(node_name::GENERATE_TITLE, |mut s: TurnState| async move {
            s.title_exists = true;
            Ok(s)
        }));
        registry.register(node(node_name::GIVE_CONTEXT, |mut s: TurnState| async move {
            s.upsert_system_preamble("context");
            Ok(s)
        }));
        registry.register(node(
            node_name::CHECK_QUERY_ADJUST,
            |mut s: TurnState| async move {
                s.adjust_query = true;
                Ok(s)
            },
        ));
        registry.register(node(node_name::GET_TABLES, |mut s: TurnState| async move {
            s.tables = vec!["window_activity".into()];
            Ok(s)
        }));
        registry.register(node(
            node_name::EXTRACT_ACTIVITIES,
            |mut s: TurnState| async move {
                s.activities = vec!["coding".into()];
                Ok(s)
            },
        ));
        registry.register(node(node_name::GET_SCOPE, |s: TurnState| async move { Ok(s) }));
        registry.register(node(node_name::WRITE_QUERY, |mut s: TurnState| async move {
            s.query = Some("SELECT app, minutes FROM window_activity".into());
            Ok(s)
        }));
        let exec_rows = rows;
        registry.register(node(node_name::EXECUTE_QUERY, move |mut s: TurnState| {
            let rows = exec_rows.clone();
            async move {
                if s.raw_result.is_none() {
                    let formatted = crate::format::rows_to_markdown(&rows);
                    s.set_query_result(rows, formatted);
                }
                Ok(s)
            }
        }));
        registry.register(node(
            node_name::CHECK_PLOT_NEEDED,
            |mut s: TurnState| async move {
                s.wants_plot = WantsPlot::No;
                Ok(s)
            },
        ));
        registry.register(node(node_name::CREATE_PLOT, |mut s: TurnState| async move {
            s.plot_attempts += 1;
            s.plot_code = Some("plt.savefig(SAVE_PATH)".into());
            Ok(s)
        }));
        registry.register(node(node_name::RUN_PLOT, move |mut s: TurnState| async move {
            if s.plot_attempts <= plot_failures {
                s.plot_error = Some("Exception: no display".into());
            } else {
                s.plot_error = None;
                s.plot_path = Some("/tmp/plot.png".into());
                s.plot_base64 = Some("data:image/png;base64,xxxx".into());
            }
            Ok(s)
        }));
        registry.register(node(
            node_name::GENERAL_ANSWER,
            |mut s: TurnState| async move {
                s.answer = Some("I watch your activity data.".into());
                s.push_assistant_message("I watch your activity data.", None);
                Ok(s)
            },
        ));
        registry.register(node(
            node_name::GENERATE_ANSWER,
            |mut s: TurnState| async move {
                let answer = format!("based on {} chunk(s)", s.result.len());
                s.answer = Some(answer.clone());
                let meta = MessageMeta {
                    tables: s.tables.clone(),
                    activities: s.activities.clone(),
                    query: s.query.clone(),
                    result: s.raw_result.clone(),
                    ..MessageMeta::default()
                };
                s.push_assistant_message(answer, Some(meta));
                Ok(s)
            },
        ));

        registry
    }

    fn engine_with(
        registry: NodeRegistry,
        checkpoints: Arc<MemCheckpoints>,
        sink: Arc<dyn EventSink>,
    ) -> Engine<MemCheckpoints> {
        Engine::new(registry, TurnGraph::new().unwrap(), checkpoints, sink).unwrap()
    }

    fn seeded(thread_id: &str, question: &str, auto: bool) -> TurnState {
        let mut state = TurnState::new(thread_id, question);
        state.wants_plot = WantsPlot::No;
        state.auto_sql = auto;
        state.auto_approve = auto;
        state.push_user_message(question);
        state
    }

    // -- tests ---------------------------------------------------------------

    #[tokio::test]
    async fn completed_turn_appends_one_assistant_message_and_terminal_checkpoint() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([{"app": "code", "minutes": 91}]), 0),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        let outcome = engine.start(seeded("1", "how long did I code?", true)).await.unwrap();
        let state = match outcome {
            TurnOutcome::Completed(state) => state,
            other => panic!("expected completion, got {other:?}"),
        };

        let assistant_count = state
            .messages
            .iter()
            .filter(|m| m.role == worklens_types::llm::MessageRole::Assistant)
            .count();
        assert_eq!(assistant_count, 1);

        let sequence = checkpoints.node_sequence("1");
        assert_eq!(sequence.last().unwrap(), node_name::GENERATE_ANSWER);
        assert_eq!(sequence.first().unwrap(), node_name::CLASSIFY);
        // One checkpoint per executed node, none skipped or duplicated.
        assert_eq!(
            sequence,
            vec![
                node_name::CLASSIFY,
                node_name::GENERATE_TITLE,
                node_name::GIVE_CONTEXT,
                node_name::GET_TABLES,
                node_name::EXTRACT_ACTIVITIES,
                node_name::GET_SCOPE,
                node_name::WRITE_QUERY,
                node_name::EXECUTE_QUERY,
                node_name::GENERATE_ANSWER,
            ]
        );
    }

    #[tokio::test]
    async fn general_qa_skips_the_sql_pipeline() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([]), 0),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        let outcome = engine
            .start(seeded("1", "tell me about yourself", true))
            .await
            .unwrap();
        assert!(matches!(outcome, TurnOutcome::Completed(_)));

        let sequence = checkpoints.node_sequence("1");
        assert_eq!(
            sequence,
            vec![node_name::CLASSIFY.to_string(), node_name::GENERAL_ANSWER.to_string()]
        );
        assert!(!sequence.contains(&node_name::GET_TABLES.to_string()));
    }

    #[tokio::test]
    async fn pauses_at_the_approval_gate_and_emits_interruption() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([{"app": "code"}]), 0),
            checkpoints.clone(),
            Arc::new(bus),
        );

        let outcome = engine
            .start(seeded("1", "how long did I code?", false))
            .await
            .unwrap();
        let state = match outcome {
            TurnOutcome::Paused(state) => state,
            other => panic!("expected pause, got {other:?}"),
        };

        // No answer yet, checkpoint parked at the gate.
        assert!(state.last_assistant_message().is_none());
        assert_eq!(
            checkpoints.node_sequence("1").last().unwrap(),
            node_name::EXECUTE_QUERY
        );

        let mut saw_interruption = false;
        while let Ok(event) = rx.try_recv() {
            if let TurnEventKind::Interruption { query, data } = event.kind {
                assert!(query.contains("SELECT"));
                assert_eq!(data[0]["app"], "code");
                saw_interruption = true;
            }
        }
        assert!(saw_interruption);
    }

    #[tokio::test]
    async fn resume_applies_patch_and_matches_uninterrupted_run() {
        let corrected = json!([{"app": "code", "minutes": 120}]);

        // Interrupted run, patched on resume.
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([{"app": "code", "minutes": 91}]), 0),
            checkpoints.clone(),
            Arc::new(NullSink),
        );
        let paused = engine
            .start(seeded("1", "how long did I code?", false))
            .await
            .unwrap();
        assert!(matches!(paused, TurnOutcome::Paused(_)));

        let patch = StatePatch::with_result(
            corrected.clone(),
            crate::format::rows_to_markdown(&corrected),
        );
        let resumed = engine.resume("1", &patch).await.unwrap();
        let resumed_state = match resumed {
            TurnOutcome::Completed(state) => state,
            other => panic!("expected completion, got {other:?}"),
        };

        // Uninterrupted run where the SQL stage yields the corrected rows
        // directly.
        let direct_engine = engine_with(
            scripted_registry(corrected.clone(), 0),
            Arc::new(MemCheckpoints::default()),
            Arc::new(NullSink),
        );
        let direct = direct_engine
            .start(seeded("2", "how long did I code?", true))
            .await
            .unwrap();
        let direct_state = match direct {
            TurnOutcome::Completed(state) => state,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(resumed_state.raw_result, Some(corrected));
        assert_eq!(resumed_state.result, direct_state.result);
        assert_eq!(resumed_state.answer, direct_state.answer);

        // Patch became durable in the post-resume checkpoints.
        let latest = checkpoints.latest("1").await.unwrap().unwrap();
        assert_eq!(latest.node, node_name::GENERATE_ANSWER);
        assert_eq!(latest.state.raw_result, resumed_state.raw_result);
    }

    #[tokio::test]
    async fn failed_node_writes_no_checkpoint() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        let mut registry = scripted_registry(json!([]), 0);
        registry.register(node(node_name::WRITE_QUERY, |_s: TurnState| async move {
            Err(NodeError::Precondition("schema unavailable".into()))
        }));
        let engine = engine_with(registry, checkpoints.clone(), Arc::new(NullSink));

        let err = engine
            .start(seeded("1", "how long did I code?", true))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Node { ref node, .. } if node == node_name::WRITE_QUERY));

        // Last good checkpoint is the node before the failure.
        assert_eq!(
            checkpoints.node_sequence("1").last().unwrap(),
            node_name::GET_SCOPE
        );
    }

    #[tokio::test]
    async fn resume_without_checkpoint_is_rejected_without_mutation() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([]), 0),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        let err = engine.resume("ghost", &StatePatch::empty()).await.unwrap_err();
        assert!(matches!(err, EngineError::NoCheckpoint(_)));
        assert!(checkpoints.node_sequence("ghost").is_empty());
    }

    #[tokio::test]
    async fn resume_from_non_gate_checkpoint_is_rejected_without_mutation() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        let engine = engine_with(
            scripted_registry(json!([]), 0),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        // Run to completion; latest checkpoint is a terminal, not the gate.
        engine
            .start(seeded("1", "how long did I code?", true))
            .await
            .unwrap();
        let before = checkpoints.node_sequence("1");

        let err = engine.resume("1", &StatePatch::empty()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidResume { .. }));
        assert_eq!(checkpoints.node_sequence("1"), before);
    }

    #[tokio::test]
    async fn plot_failures_retry_up_to_the_cap_then_answer() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        // Plot run always fails.
        let engine = engine_with(
            scripted_registry(json!([{"n": 1}]), u32::MAX),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        let mut state = seeded("1", "chart my coding time", true);
        state.wants_plot = WantsPlot::Yes;
        let outcome = engine.start(state).await.unwrap();
        let state = match outcome {
            TurnOutcome::Completed(state) => state,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(state.plot_attempts, TurnState::MAX_PLOT_ATTEMPTS);
        assert!(state.plot_error.is_some());
        assert!(state.answer.is_some());

        let creates = checkpoints
            .node_sequence("1")
            .iter()
            .filter(|n| n.as_str() == node_name::CREATE_PLOT)
            .count();
        assert_eq!(creates as u32, TurnState::MAX_PLOT_ATTEMPTS);
    }

    #[tokio::test]
    async fn plot_retry_eventually_succeeding_keeps_artifact_and_clears_error() {
        let checkpoints = Arc::new(MemCheckpoints::default());
        // Fails twice, succeeds on the third run.
        let engine = engine_with(
            scripted_registry(json!([{"n": 1}]), 2),
            checkpoints.clone(),
            Arc::new(NullSink),
        );

        let mut state = seeded("1", "chart my coding time", true);
        state.wants_plot = WantsPlot::Yes;
        let outcome = engine.start(state).await.unwrap();
        let state = match outcome {
            TurnOutcome::Completed(state) => state,
            other => panic!("expected completion, got {other:?}"),
        };

        assert_eq!(state.plot_attempts, 3);
        assert!(state.plot_error.is_none());
        assert!(state.plot_base64.as_deref().unwrap().starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn step_events_arrive_in_execution_order() {
        let bus = EventBus::new(256);
        let mut rx = bus.subscribe();
        let engine = engine_with(
            scripted_registry(json!([]), 0),
            Arc::new(MemCheckpoints::default()),
            Arc::new(bus),
        );

        engine
            .start(seeded("1", "tell me about yourself", true))
            .await
            .unwrap();

        let mut steps = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let TurnEventKind::Step { node, .. } = event.kind {
                steps.push(node);
            }
        }
        assert_eq!(steps, vec![node_name::CLASSIFY, node_name::GENERAL_ANSWER]);
    }

    #[tokio::test]
    async fn missing_node_registration_fails_construction() {
        let mut registry = NodeRegistry::new();
        registry.register(node(node_name::CLASSIFY, |s: TurnState| async move { Ok(s) }));

        let result = Engine::new(
            registry,
            TurnGraph::new().unwrap(),
            Arc::new(MemCheckpoints::default()),
            Arc::new(NullSink) as Arc<dyn EventSink>,
        );
        assert!(matches!(result, Err(EngineError::MissingNode(_))));
    }
}
