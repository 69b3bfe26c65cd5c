//! Wiring: one [`App`] holds the pool, the SQLite repositories, the model
//! providers and the dialogue orchestrator built from a [`Config`].

use std::sync::Arc;

use anyhow::Result;
use sqlx::SqlitePool;
use tracing::info;

use concierge_core::chat::ChatProvider;
use concierge_core::clock::{Clock, SystemClock};
use concierge_core::embedding::EmbeddingProvider;
use concierge_core::retrieval::RetrievalService;

use crate::chat::create_chat;
use crate::config::Config;
use crate::db;
use crate::dialogue::{DialogueSettings, Orchestrator};
use crate::embedding::create_embedder;
use crate::ingest::Ingestor;
use crate::migrate;
use crate::sqlite_catalog::SqliteCatalog;
use crate::sqlite_conversations::SqliteConversations;
use crate::sqlite_store::SqliteStore;

pub struct App {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub catalog: Arc<SqliteCatalog>,
    pub conversations: Arc<SqliteConversations>,
    pub embedder: Arc<dyn EmbeddingProvider>,
    pub chat: Arc<dyn ChatProvider>,
    /// `None` when embeddings are disabled; turns then run without knowledge.
    pub retrieval: Option<Arc<RetrievalService>>,
    pub orchestrator: Arc<Orchestrator>,
}

impl App {
    /// Connect, migrate and build the providers named in the config.
    pub async fn open(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let chat = create_chat(&config.chat)?;
        Self::with_providers(config, embedder, chat, Arc::new(SystemClock)).await
    }

    /// Like [`App::open`] with caller-supplied providers and clock.
    pub async fn with_providers(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::apply(&pool).await?;

        let store = Arc::new(SqliteStore::new(pool.clone()));
        let catalog = Arc::new(SqliteCatalog::new(pool.clone()));
        let conversations = Arc::new(
            SqliteConversations::new(pool.clone())
                .with_history_limit(config.dialogue.history_window),
        );

        let retrieval = if config.embedding.is_enabled() {
            let rewriter = config.chat.is_enabled().then(|| chat.clone());
            Some(Arc::new(RetrievalService::new(
                embedder.clone(),
                store.clone(),
                rewriter,
                config.retrieval.settings(),
            )))
        } else {
            None
        };

        let orchestrator = Arc::new(Orchestrator::new(
            conversations.clone(),
            catalog.clone(),
            chat.clone(),
            retrieval.clone(),
            clock,
            config.dialogue.history_window,
            DialogueSettings::from_config(&config),
        ));

        info!(
            db = %config.db.path.display(),
            embedding = %embedder.model_name(),
            chat = %chat.model_name(),
            retrieval = retrieval.is_some(),
            "concierge ready"
        );

        Ok(Self {
            config: Arc::new(config),
            pool,
            store,
            catalog,
            conversations,
            embedder,
            chat,
            retrieval,
            orchestrator,
        })
    }

    pub fn ingestor(&self) -> Ingestor {
        Ingestor::new(
            self.store.clone(),
            self.embedder.clone(),
            self.config.chunking.params(),
        )
    }
}
