//! The pipeline nodes, one module per stage.
//!
//! Every node holds its own dependencies (provider handle, model name,
//! ports) and implements [`Node`](crate::workflow::Node) over the shared
//! turn state. [`build_registry`] wires the full set against one dependency
//! bundle; the engine then only ever sees the registry.

use std::sync::Arc;
use std::time::Duration;

use worklens_types::config::ModelConfig;
use worklens_types::llm::{Message, MessageRole};
use worklens_types::state::TurnState;

use crate::analytics::AnalyticsStore;
use crate::event::EventSink;
use crate::llm::BoxLlmProvider;
use crate::plot::PlotRunner;
use crate::repository::ChatRepository;
use crate::workflow::NodeRegistry;

pub mod aggregations;
pub mod answer;
pub mod classify;
pub mod context;
pub mod plot;
pub mod query;
pub mod tables;
pub mod title;

pub use answer::{AnswerNode, GeneralAnswerNode};
pub use classify::ClassifyNode;
pub use context::ContextNode;
pub use plot::{CreatePlotNode, PlotDecisionNode, RunPlotNode};
pub use query::{ExecuteQueryNode, QueryAdjustNode, WriteQueryNode, correct_query};
pub use tables::{ActivitiesNode, ScopeNode, TablesNode};
pub use title::TitleNode;

/// Conversation history as provider messages, system preamble excluded.
///
/// The preamble travels separately: completion requests carry it in their
/// `system` field, where each node substitutes its own.
pub(crate) fn llm_history(state: &TurnState) -> Vec<Message> {
    state
        .visible_messages()
        .map(|m| match m.role {
            MessageRole::Assistant => Message::assistant(&m.content),
            _ => Message::user(&m.content),
        })
        .collect()
}

/// Everything the full node set needs, bundled for [`build_registry`].
pub struct PipelineDeps<A, P, R> {
    pub provider: Arc<BoxLlmProvider>,
    pub models: ModelConfig,
    pub store: Arc<A>,
    pub plot_runner: Arc<P>,
    pub chats: Arc<R>,
    pub sink: Arc<dyn EventSink>,
    pub query_timeout_secs: u64,
}

/// Construct the registry with every pipeline node wired in.
pub fn build_registry<A, P, R>(deps: PipelineDeps<A, P, R>) -> NodeRegistry
where
    A: AnalyticsStore + 'static,
    P: PlotRunner + 'static,
    R: ChatRepository + 'static,
{
    let PipelineDeps {
        provider,
        models,
        store,
        plot_runner,
        chats,
        sink,
        query_timeout_secs,
    } = deps;

    let mut registry = NodeRegistry::new();
    registry.register(ClassifyNode::new(provider.clone(), &models.classify));
    registry.register(TitleNode::new(provider.clone(), &models.title, chats));
    registry.register(ContextNode::new(provider.clone(), &models.selection));
    registry.register(QueryAdjustNode::new(provider.clone(), &models.selection));
    registry.register(TablesNode::new(
        provider.clone(),
        &models.selection,
        store.clone(),
    ));
    registry.register(ActivitiesNode::new(
        provider.clone(),
        &models.selection,
        store.clone(),
    ));
    registry.register(ScopeNode::new(provider.clone(), &models.selection));
    registry.register(WriteQueryNode::new(
        provider.clone(),
        &models.sql,
        store.clone(),
    ));
    registry.register(ExecuteQueryNode::with_timeout(
        store,
        Duration::from_secs(query_timeout_secs),
    ));
    registry.register(PlotDecisionNode::new(provider.clone(), &models.plot));
    registry.register(CreatePlotNode::new(provider.clone(), &models.plot));
    registry.register(RunPlotNode::new(plot_runner));
    registry.register(AnswerNode::new(
        provider.clone(),
        &models.answer,
        sink.clone(),
    ));
    registry.register(GeneralAnswerNode::new(provider, &models.answer, sink));
    registry
}

#[cfg(test)]
pub(crate) mod tests {
    //! Shared fixtures for node tests: canned providers and in-memory ports.

    use std::collections::HashMap;
    use std::pin::Pin;
    use std::sync::Arc;
    use std::sync::Mutex;

    use chrono::Utc;
    use futures_util::Stream;
    use serde_json::{Value, json};

    use worklens_types::checkpoint::{ChatFeedback, ChatMeta};
    use worklens_types::error::{AnalyticsError, PlotError, RepositoryError};
    use worklens_types::llm::{
        CompletionRequest, CompletionResponse, LlmError, StopReason, StreamEvent, Usage,
    };

    use crate::analytics::AnalyticsStore;
    use crate::event::NullSink;
    use crate::llm::{BoxLlmProvider, LlmProvider};
    use crate::plot::{PlotArtifact, PlotRunner};
    use crate::repository::ChatRepository;
    use crate::workflow::graph::ALL_NODES;

    use super::{PipelineDeps, build_registry};

    // -- providers ----------------------------------------------------------

    struct CannedProvider {
        content: String,
    }

    impl LlmProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                id: "r1".into(),
                content: self.content.clone(),
                model: request.model.clone(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }

        fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
            Box::pin(futures_util::stream::iter(vec![
                Ok(StreamEvent::TextDelta {
                    index: 0,
                    text: self.content.clone(),
                }),
                Ok(StreamEvent::Done),
            ]))
        }
    }

    /// Provider returning `content` for every completion.
    pub(crate) fn canned_provider(content: &str) -> Arc<BoxLlmProvider> {
        Arc::new(BoxLlmProvider::new(CannedProvider {
            content: content.to_string(),
        }))
    }

    struct StreamingProvider {
        parts: Vec<String>,
    }

    impl LlmProvider for StreamingProvider {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(
            &self,
            request: &CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse {
                id: "r1".into(),
                content: self.parts.concat(),
                model: request.model.clone(),
                stop_reason: StopReason::EndTurn,
                usage: Usage::default(),
            })
        }

        fn stream(
            &self,
            _request: CompletionRequest,
        ) -> Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>> {
            let mut events: Vec<Result<StreamEvent, LlmError>> = self
                .parts
                .iter()
                .map(|part| {
                    Ok(StreamEvent::TextDelta {
                        index: 0,
                        text: part.clone(),
                    })
                })
                .collect();
            events.push(Ok(StreamEvent::Done));
            Box::pin(futures_util::stream::iter(events))
        }
    }

    /// Provider streaming one text delta per element of `parts`.
    pub(crate) fn streaming_provider(parts: &[&str]) -> Arc<BoxLlmProvider> {
        Arc::new(BoxLlmProvider::new(StreamingProvider {
            parts: parts.iter().map(|p| p.to_string()).collect(),
        }))
    }

    // -- chat repository ----------------------------------------------------

    /// In-memory [`ChatRepository`].
    #[derive(Default)]
    pub(crate) struct MemChats {
        rows: Mutex<HashMap<String, ChatMeta>>,
        feedback: Mutex<Vec<ChatFeedback>>,
    }

    impl MemChats {
        pub(crate) fn seed(&self, thread_id: &str) {
            self.rows.lock().unwrap().insert(
                thread_id.to_string(),
                ChatMeta {
                    thread_id: thread_id.to_string(),
                    title: None,
                    last_activity: Utc::now(),
                },
            );
        }

        pub(crate) fn title_of(&self, thread_id: &str) -> Option<String> {
            self.rows
                .lock()
                .unwrap()
                .get(thread_id)
                .and_then(|meta| meta.title.clone())
        }

        pub(crate) fn feedback_count(&self) -> usize {
            self.feedback.lock().unwrap().len()
        }
    }

    impl ChatRepository for MemChats {
        async fn upsert(&self, meta: &ChatMeta) -> Result<(), RepositoryError> {
            self.rows
                .lock()
                .unwrap()
                .insert(meta.thread_id.clone(), meta.clone());
            Ok(())
        }

        async fn get(&self, thread_id: &str) -> Result<Option<ChatMeta>, RepositoryError> {
            Ok(self.rows.lock().unwrap().get(thread_id).cloned())
        }

        async fn list(&self) -> Result<Vec<ChatMeta>, RepositoryError> {
            let mut rows: Vec<ChatMeta> = self.rows.lock().unwrap().values().cloned().collect();
            rows.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
            Ok(rows)
        }

        async fn set_title(&self, thread_id: &str, title: &str) -> Result<(), RepositoryError> {
            match self.rows.lock().unwrap().get_mut(thread_id) {
                Some(meta) => {
                    meta.title = Some(title.to_string());
                    Ok(())
                }
                None => Err(RepositoryError::NotFound),
            }
        }

        async fn delete(&self, thread_id: &str) -> Result<(), RepositoryError> {
            self.rows.lock().unwrap().remove(thread_id);
            Ok(())
        }

        async fn save_feedback(&self, feedback: &ChatFeedback) -> Result<(), RepositoryError> {
            self.feedback.lock().unwrap().push(feedback.clone());
            Ok(())
        }
    }

    // -- analytics stores ----------------------------------------------------

    pub(crate) struct FixedStore;

    impl AnalyticsStore for FixedStore {
        async fn table_names(&self) -> Result<Vec<String>, AnalyticsError> {
            Ok(vec![
                "window_activity".into(),
                "user_input".into(),
                "session".into(),
            ])
        }

        async fn schema_overview(&self, tables: &[String]) -> Result<String, AnalyticsError> {
            Ok(tables
                .iter()
                .map(|t| format!("CREATE TABLE {t} (id INTEGER PRIMARY KEY)"))
                .collect::<Vec<_>>()
                .join("\n\n"))
        }

        async fn activity_values(&self) -> Result<Vec<String>, AnalyticsError> {
            Ok(vec![
                "Coding".into(),
                "Writing".into(),
                "WorkRelatedBrowsing".into(),
                "WorkUnrelatedBrowsing".into(),
            ])
        }

        async fn run_select(&self, _query: &str) -> Result<Value, AnalyticsError> {
            Ok(json!([{"app": "code", "minutes": 91}]))
        }
    }

    pub(crate) fn fixed_store() -> Arc<FixedStore> {
        Arc::new(FixedStore)
    }

    pub(crate) struct FailingStore;

    impl AnalyticsStore for FailingStore {
        async fn table_names(&self) -> Result<Vec<String>, AnalyticsError> {
            Err(AnalyticsError::Connection)
        }

        async fn schema_overview(&self, _tables: &[String]) -> Result<String, AnalyticsError> {
            Err(AnalyticsError::Connection)
        }

        async fn activity_values(&self) -> Result<Vec<String>, AnalyticsError> {
            Err(AnalyticsError::Connection)
        }

        async fn run_select(&self, _query: &str) -> Result<Value, AnalyticsError> {
            Err(AnalyticsError::Query("no such column: minutes".into()))
        }
    }

    pub(crate) fn failing_store() -> Arc<FailingStore> {
        Arc::new(FailingStore)
    }

    pub(crate) struct SlowStore;

    impl AnalyticsStore for SlowStore {
        async fn table_names(&self) -> Result<Vec<String>, AnalyticsError> {
            Ok(vec!["window_activity".into()])
        }

        async fn schema_overview(&self, _tables: &[String]) -> Result<String, AnalyticsError> {
            Ok(String::new())
        }

        async fn activity_values(&self) -> Result<Vec<String>, AnalyticsError> {
            Ok(Vec::new())
        }

        async fn run_select(&self, _query: &str) -> Result<Value, AnalyticsError> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(json!([]))
        }
    }

    pub(crate) fn slow_store() -> Arc<SlowStore> {
        Arc::new(SlowStore)
    }

    // -- plot runners --------------------------------------------------------

    pub(crate) struct FixedRunner;

    impl PlotRunner for FixedRunner {
        async fn render(&self, _code: &str) -> Result<PlotArtifact, PlotError> {
            Ok(PlotArtifact {
                path: "/tmp/worklens-plots/chart.png".into(),
                data_uri: "data:image/png;base64,iVBORw0KGgo=".into(),
            })
        }
    }

    pub(crate) fn fixed_runner() -> Arc<FixedRunner> {
        Arc::new(FixedRunner)
    }

    pub(crate) struct FailingRunner;

    impl PlotRunner for FailingRunner {
        async fn render(&self, _code: &str) -> Result<PlotArtifact, PlotError> {
            Err(PlotError::Execution(
                "NameError: name 'pd' is not defined".into(),
            ))
        }
    }

    pub(crate) fn failing_runner() -> Arc<FailingRunner> {
        Arc::new(FailingRunner)
    }

    // -- registry wiring -----------------------------------------------------

    #[test]
    fn registry_covers_every_graph_node() {
        let registry = build_registry(PipelineDeps {
            provider: canned_provider("{}"),
            models: worklens_types::config::ModelConfig::default(),
            store: fixed_store(),
            plot_runner: fixed_runner(),
            chats: Arc::new(MemChats::default()),
            sink: Arc::new(NullSink),
            query_timeout_secs: 180,
        });

        for node in ALL_NODES {
            assert!(registry.contains(node), "missing node: {node}");
        }
    }
}
