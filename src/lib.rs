//! Query Orchestrator - conversational queries over cache-aside chat history
//!
//! Each query reads the conversation's recent turns (Redis first, SQLite on a
//! miss), optionally pulls similar documents from a RAG service, asks an
//! OpenAI-style completion backend, and records the exchange.

pub mod config;
pub mod core;
pub mod history;
pub mod query;
pub mod server;
pub mod storage;
pub mod utils;

pub mod cli;

pub use crate::config::{CacheBackend, Settings};
pub use crate::history::{ConversationKey, HistoryCoordinator, HistoryError, HistoryPolicy, Role, Turn};
pub use crate::query::{QueryError, QueryRequest, QueryResponse, QueryService};

use anyhow::Context;
use crate::core::documents::DocumentClient;
use crate::core::llm::LLMClient;
use std::sync::Arc;
use crate::storage::{HistoryCache, HistoryStore, InMemoryHistoryCache, RedisHistoryCache, SqliteHistoryStore};

/// Process-wide handles, built once at startup and released by `shutdown`
pub struct App {
    settings: Settings,
    history: Arc<HistoryCoordinator>,
    service: Arc<QueryService>,
}

impl App {
    /// Open the store and cache named in `settings` and wire the services
    pub async fn start(settings: Settings) -> anyhow::Result<Self> {
        let store = SqliteHistoryStore::open(&settings.store.path)
            .with_context(|| format!("Failed to open history store at {}", settings.store.path))?;

        let cache: Arc<dyn HistoryCache> = match settings.cache.backend {
            CacheBackend::Redis => {
                let cache = RedisHistoryCache::new(&settings.cache.url, &settings.cache.key_prefix)
                    .context("Invalid cache URL")?;
                // An unreachable cache only degrades reads to the store.
                if let Err(e) = cache.connect().await {
                    tracing::warn!(error = %e, "History cache not reachable at startup, will retry on demand");
                }
                Arc::new(cache)
            }
            CacheBackend::Memory => Arc::new(InMemoryHistoryCache::new(&settings.cache.key_prefix)),
        };

        Self::from_parts(settings, Arc::new(store), cache)
    }

    /// Wire the services around an already constructed store and cache
    pub fn from_parts(
        settings: Settings,
        store: Arc<dyn HistoryStore>,
        cache: Arc<dyn HistoryCache>,
    ) -> anyhow::Result<Self> {
        let history = Arc::new(HistoryCoordinator::new(
            store,
            cache,
            HistoryPolicy::from(&settings.history),
        ));
        let documents =
            DocumentClient::new(&settings.services).context("Failed to build document client")?;
        let llm = LLMClient::new(&settings.services, Settings::llm_api_key())
            .context("Failed to build completion client")?;
        let service = Arc::new(QueryService::new(history.clone(), documents, llm));

        tracing::info!(
            cache = ?settings.cache.backend,
            max_turns = settings.history.max_turns,
            ttl_secs = settings.history.cache_ttl_seconds,
            "Query orchestrator initialized"
        );

        Ok(Self {
            settings,
            history,
            service,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn history(&self) -> &Arc<HistoryCoordinator> {
        &self.history
    }

    pub fn service(&self) -> &Arc<QueryService> {
        &self.service
    }

    pub fn router(&self) -> axum::Router {
        server::router(self.service.clone())
    }

    /// Serve HTTP until Ctrl+C
    pub async fn serve(&self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.settings.server.host, self.settings.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("Failed to bind {}", addr))?;

        tracing::info!("Server running on http://{}", addr);

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;
        Ok(())
    }

    /// Release the store and cache handles
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let stats = self.history.stats();
        tracing::info!(
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            store_reads = stats.store_reads,
            cache_degraded = stats.cache_degraded,
            "Query orchestrator shutdown complete"
        );
        Ok(())
    }
}
