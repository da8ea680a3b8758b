//! Application state wiring the pipeline against its concrete backends.
//!
//! Services in `worklens-core` are generic over repository and collaborator
//! traits; `AppState` pins them to the SQLite and subprocess implementations
//! from `worklens-infra` and hands the result to the REST and WebSocket
//! handlers.

use std::path::Path;
use std::sync::Arc;

use worklens_core::chat::ChatService;
use worklens_core::event::{EventBus, EventSink};
use worklens_core::llm::BoxLlmProvider;
use worklens_core::nodes::{PipelineDeps, build_registry};
use worklens_core::turn::TurnService;
use worklens_core::workflow::{Engine, TurnGraph};
use worklens_infra::analytics::SqliteAnalyticsStore;
use worklens_infra::config;
use worklens_infra::llm::create_provider;
use worklens_infra::plot::PythonPlotRunner;
use worklens_infra::sqlite::chat::SqliteChatRepository;
use worklens_infra::sqlite::checkpoint::SqliteCheckpointRepository;
use worklens_infra::sqlite::pool::DatabasePool;
use worklens_types::config::WorklensConfig;

/// Concrete type aliases for the service generics pinned to infra implementations.
pub type ConcreteTurnService = TurnService<SqliteChatRepository, SqliteCheckpointRepository>;
pub type ConcreteChatService = ChatService<SqliteChatRepository, SqliteCheckpointRepository>;

/// Shared application state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub turn_service: Arc<ConcreteTurnService>,
    pub chat_service: Arc<ConcreteChatService>,
    pub analytics: Arc<SqliteAnalyticsStore>,
    pub provider: Arc<BoxLlmProvider>,
    pub event_bus: EventBus,
    pub config: WorklensConfig,
}

impl AppState {
    /// Initialize the application state: open both databases, wire the node
    /// registry, build the engine.
    ///
    /// Fails when the chat database cannot be opened or migrated, when the
    /// collector's activity database is missing, or when the graph and
    /// registry disagree about the node set.
    pub async fn init(config: WorklensConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let chat_db_url = config::chat_database_url(data_dir);
        let pool = DatabasePool::new(&chat_db_url).await?;

        let checkpoints = Arc::new(SqliteCheckpointRepository::new(pool.clone()));
        let chats = Arc::new(SqliteChatRepository::new(pool));

        let activity_path = config::activity_db_path(&config.analytics, data_dir);
        let analytics = Arc::new(
            SqliteAnalyticsStore::open(&activity_path, config.analytics.allowed_tables.clone())
                .await?,
        );

        let provider = Arc::new(create_provider(&config.llm));

        let plot_dir = config::plot_output_dir(&config.plot, data_dir);
        let plot_runner = Arc::new(PythonPlotRunner::from_config(&config.plot, plot_dir));

        let event_bus = EventBus::new(1024);
        let sink: Arc<dyn EventSink> = Arc::new(event_bus.clone());

        let registry = build_registry(PipelineDeps {
            provider: provider.clone(),
            models: config.llm.models.clone(),
            store: analytics.clone(),
            plot_runner,
            chats: chats.clone(),
            sink: sink.clone(),
            query_timeout_secs: config.analytics.query_timeout_secs,
        });
        let engine = Engine::new(registry, TurnGraph::new()?, checkpoints.clone(), sink)?;

        let turn_service = Arc::new(TurnService::new(
            engine,
            chats.clone(),
            checkpoints.clone(),
            config.engine.auto_approve,
        ));
        let chat_service = Arc::new(ChatService::new(chats, checkpoints));

        Ok(Self {
            turn_service,
            chat_service,
            analytics,
            provider,
            event_bus,
            config,
        })
    }
}
