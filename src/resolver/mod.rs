//! Multi-provider book resolution.
//!
//! # Module layout
//!
//! - [`capability`] -- What a provider can do, as a bit set.
//! - [`provider`] -- The [`Provider`] trait and payload types.
//! - [`providers`] -- Concrete adapters (Open Library, ISBNdb, ...).
//! - [`registry`] -- Capability to ordered provider list.
//! - [`rate_limit`], [`quota`], [`cache`] -- Shared-store coordination.
//! - [`runtime`] -- Cache, quota and rate-limit plumbing for one adapter.
//! - [`scoring`] -- Confidence scoring.
//! - [`orchestrator`] -- Fallback chain with per-provider timeouts.
//! - [`batch`] -- Many ISBNs per request.
//! - [`service`] -- [`BookResolver`], the caller-facing API.
//! - [`queue`], [`sink`] -- Background enrichment from a message queue.

pub mod batch;
pub mod cache;
pub mod capability;
pub mod orchestrator;
pub mod provider;
pub mod providers;
pub mod queue;
pub mod quota;
pub mod rate_limit;
pub mod registry;
pub mod runtime;
pub mod scoring;
pub mod service;
pub mod sink;

pub use batch::{BatchOutcome, BatchResolver};
pub use capability::{Capability, CapabilitySet};
pub use orchestrator::{Orchestrator, Resolution};
pub use provider::{Candidate, Provider, ResolveContext, TitleQuery};
pub use queue::{ConsumeReport, MemoryQueue, MessageQueue, QueueConsumer, QueueMessage};
pub use quota::{QuotaManager, QuotaStatus};
pub use registry::ProviderRegistry;
pub use runtime::ProviderDeps;
pub use service::BookResolver;
pub use sink::{EnrichmentSink, SqliteSink};

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bookforged_db::pool::{init_memory_pool, init_pool, DbPool};
use tracing::info;

use self::cache::NegativeCache;
use crate::clock::SystemClock;
use crate::config::{Config, ProviderKind, StoreBackend};
use crate::http::HttpFetcher;
use crate::secrets::EnvSecrets;
use crate::store::{KvStore, MemoryStore, SqliteStore};

/// Everything needed to resolve books, assembled from configuration.
pub struct Engine {
    pub resolver: Arc<BookResolver>,
    pub deps: ProviderDeps,
    /// Database for enrichment records. In-memory when the store is.
    pub pool: DbPool,
    config: Config,
}

impl Engine {
    /// Build production dependencies (HTTP, environment secrets, the
    /// configured store) and the resolver on top of them.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let pool = match config.store.backend {
            StoreBackend::Sqlite => {
                let path = config.store.path.to_string_lossy();
                info!(path = %path, "Opening store database");
                init_pool(&path).with_context(|| format!("Failed to open database at {path}"))?
            }
            StoreBackend::Memory => init_memory_pool().context("Failed to open in-memory database")?,
        };

        let clock = Arc::new(SystemClock);
        let store: Arc<dyn KvStore> = match config.store.backend {
            StoreBackend::Sqlite => Arc::new(SqliteStore::with_clock(pool.clone(), clock.clone())),
            StoreBackend::Memory => Arc::new(MemoryStore::with_clock(clock.clone())),
        };
        let secrets = match &config.resolver.secret_prefix {
            Some(prefix) => EnvSecrets::with_prefix(prefix.clone()),
            None => EnvSecrets::new(),
        };
        let deps = ProviderDeps {
            fetcher: Arc::new(HttpFetcher::new(&config.http)?),
            store,
            secrets: Arc::new(secrets),
            clock,
        };

        Self::with_deps(config, deps, pool).await
    }

    /// Build the resolver over caller-supplied dependencies.
    pub async fn with_deps(config: &Config, deps: ProviderDeps, pool: DbPool) -> Result<Self> {
        let providers = providers::build_providers(config, &deps).await;
        let registry = Arc::new(ProviderRegistry::new(providers)?);
        info!(
            providers = registry.len(),
            capabilities = registry.capabilities().len(),
            "Provider registry ready"
        );

        let provider_timeout = Duration::from_secs(config.resolver.provider_timeout_secs);
        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&registry), provider_timeout)
                .with_min_confidence(config.resolver.min_confidence),
        );
        let absent = NegativeCache::new(
            Arc::clone(&deps.store),
            Duration::from_secs(config.resolver.negative_ttl_secs),
        );
        let batch = BatchResolver::new(
            Arc::clone(&orchestrator),
            absent.clone(),
            provider_timeout,
            config.resolver.batch_fallback_concurrency,
        );

        Ok(Self {
            resolver: Arc::new(BookResolver::new(orchestrator, batch, absent)),
            deps,
            pool,
            config: config.clone(),
        })
    }

    /// Current usage of every enabled metered provider.
    pub async fn quota_statuses(&self) -> Result<Vec<QuotaStatus>> {
        let mut statuses = Vec::new();
        for entry in self
            .config
            .providers
            .iter()
            .filter(|p| p.enabled && p.name == ProviderKind::Isbndb)
        {
            let manager = QuotaManager::new(
                entry.name.as_str(),
                providers::quota_policy(entry),
                Arc::clone(&self.deps.store),
                Arc::clone(&self.deps.clock),
            );
            let status = manager
                .status()
                .await
                .with_context(|| format!("Failed to read quota for {}", entry.name))?;
            statuses.push(status);
        }
        Ok(statuses)
    }

    /// A queue consumer writing into this engine's database.
    pub fn consumer(&self, queue: Arc<dyn MessageQueue>) -> QueueConsumer {
        QueueConsumer::new(
            queue,
            Arc::clone(&self.resolver),
            Arc::new(SqliteSink::with_clock(self.pool.clone(), Arc::clone(&self.deps.clock))),
            self.config.queue.batch_size,
            Duration::from_millis(self.config.queue.poll_interval_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;
    use crate::secrets::StaticSecrets;
    use crate::test_support::ScriptedFetcher;
    use bookforged_common::Priority;
    use serde_json::json;

    fn deps(fetcher: Arc<ScriptedFetcher>) -> ProviderDeps {
        ProviderDeps {
            fetcher,
            store: Arc::new(MemoryStore::new()),
            secrets: Arc::new(StaticSecrets::new()),
            clock: Arc::new(SystemClock),
        }
    }

    fn open_library_only() -> Config {
        let mut entry = ProviderConfig::new(ProviderKind::OpenLibrary);
        entry.min_interval_ms = Some(0);
        Config {
            providers: vec![entry],
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn engine_resolves_through_configured_providers() {
        let fetcher = Arc::new(ScriptedFetcher::new().on(
            "/api/books",
            json!({"ISBN:9780451524935": {"title": "1984", "authors": [{"name": "George Orwell"}]}}),
        ));
        let engine = Engine::with_deps(
            &open_library_only(),
            deps(fetcher),
            init_memory_pool().unwrap(),
        )
        .await
        .unwrap();

        let found = engine
            .resolver
            .fetch_metadata("978-0-451-52493-5", &ResolveContext::new())
            .await
            .unwrap();
        assert_eq!(found.value.title, "1984");
        assert_eq!(found.source, "open_library");
    }

    #[tokio::test]
    async fn title_lookup_settles_in_free_tier_before_paid() {
        let fetcher = Arc::new(
            ScriptedFetcher::new()
                .on("search.json", json!({"docs": []}))
                .on(
                    "/volumes",
                    json!({"items": [{"volumeInfo": {
                        "title": "1984 (Signet Classics)",
                        "authors": ["Signet"],
                        "industryIdentifiers": [{"type": "ISBN_13", "identifier": "9780451524935"}]
                    }}]}),
                ),
        );
        let providers = [
            ProviderKind::OpenLibrary,
            ProviderKind::GoogleBooks,
            ProviderKind::Isbndb,
        ]
        .into_iter()
        .map(|kind| {
            let mut entry = ProviderConfig::new(kind);
            entry.min_interval_ms = Some(0);
            entry
        })
        .collect();
        let config = Config {
            providers,
            ..Config::default()
        };
        let deps = ProviderDeps {
            secrets: Arc::new(StaticSecrets::new().with("ISBNDB_API_KEY", "k")),
            ..deps(Arc::clone(&fetcher))
        };
        let engine = Engine::with_deps(&config, deps, init_memory_pool().unwrap())
            .await
            .unwrap();

        let found = engine
            .resolver
            .resolve_isbn("1984", Some("George Orwell"), &ResolveContext::new())
            .await
            .unwrap();
        assert_eq!(found.value.isbn.as_str(), "9780451524935");
        assert_eq!(found.source, "google_books");
        // base + contains, no author match, no metadata signals
        assert_eq!(found.confidence, 60);
        assert_eq!(fetcher.calls_matching("isbndb"), 0);
    }

    #[tokio::test]
    async fn quota_statuses_cover_metered_providers() {
        let mut config = Config::default();
        for entry in &mut config.providers {
            if entry.name == ProviderKind::Isbndb {
                entry.daily_limit = Some(500);
            }
        }
        let engine = Engine::with_deps(
            &config,
            deps(Arc::new(ScriptedFetcher::new())),
            init_memory_pool().unwrap(),
        )
        .await
        .unwrap();

        let statuses = engine.quota_statuses().await.unwrap();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].provider, "isbndb");
        assert_eq!(statuses[0].daily_limit, 500);
        assert_eq!(statuses[0].used_today, 0);
    }

    #[tokio::test]
    async fn consumer_persists_into_engine_database() {
        let fetcher = Arc::new(ScriptedFetcher::new().on(
            "/api/books",
            json!({"ISBN:9780451524935": {"title": "1984"}}),
        ));
        let engine = Engine::with_deps(
            &open_library_only(),
            deps(fetcher),
            init_memory_pool().unwrap(),
        )
        .await
        .unwrap();

        let queue = Arc::new(MemoryQueue::new(3));
        queue.publish(
            "9780451524935",
            Capability::FetchMetadata,
            Priority::Normal,
            None,
        );
        let report = engine
            .consumer(queue)
            .consume_once(&ResolveContext::free_only())
            .await
            .unwrap();
        assert_eq!(report.persisted, 1);

        let conn = bookforged_db::pool::get_conn(&engine.pool).unwrap();
        assert_eq!(bookforged_db::queries::enrichments::count(&conn).unwrap(), 1);
    }
}
