//! Application state management

use crate::auth::{MemorySessionStore, PgSessionStore, SessionManager, SessionStore};
use crate::middleware::{Metrics, RateLimiter};
use diary_core::postgres::{connect, ensure_schema};
use diary_core::{
    AppConfig, CacheStats, CachedEntryRepository, CachedUserRepository, DiaryError,
    EntryRepository, MemoryEntryRepository, MemoryUserRepository, PgEntryRepository, PgPool,
    PgUserRepository, StorageBackend, UserRepository,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Application state shared across handlers and middleware
pub struct AppState {
    pub config: AppConfig,
    pub sessions: SessionManager,
    pub users: Arc<dyn UserRepository>,
    pub entries: Arc<dyn EntryRepository>,
    /// `None` when rate limiting is disabled
    pub rate_limiter: Option<Arc<RateLimiter>>,
    /// Stats of the repository caches, when enabled
    pub cache_stats: Vec<Arc<CacheStats>>,
    pub metrics: Metrics,
    pub start_time: Instant,
    is_ready: AtomicBool,
}

impl AppState {
    /// Assemble state from already-built components
    pub fn new(
        config: AppConfig,
        users: Arc<dyn UserRepository>,
        entries: Arc<dyn EntryRepository>,
        session_store: Arc<dyn SessionStore>,
    ) -> prometheus::Result<Self> {
        let sessions = SessionManager::new(config.auth.clone(), session_store, users.clone());
        let rate_limiter = config
            .rate_limit
            .enabled
            .then(|| Arc::new(RateLimiter::new(config.rate_limit.clone())));

        Ok(Self {
            config,
            sessions,
            users,
            entries,
            rate_limiter,
            cache_stats: Vec::new(),
            metrics: Metrics::new()?,
            start_time: Instant::now(),
            is_ready: AtomicBool::new(true),
        })
    }

    /// In-process repositories and session store
    pub fn in_memory(config: AppConfig) -> prometheus::Result<Self> {
        let (users, entries, cache_stats) = wrap_with_cache(
            &config,
            MemoryUserRepository::new(),
            MemoryEntryRepository::new(),
        );
        let mut state = Self::new(
            config,
            users,
            entries,
            Arc::new(MemorySessionStore::default()),
        )?;
        state.cache_stats = cache_stats;
        Ok(state)
    }

    /// Build state for the configured storage backend
    pub async fn from_config(config: AppConfig) -> diary_core::Result<Self> {
        match config.database.backend {
            StorageBackend::Memory => {
                info!("Using in-memory storage");
                Self::in_memory(config).map_err(metrics_error)
            }
            StorageBackend::Postgres => {
                let pool = connect(
                    &config.database.postgres_url,
                    config.database.postgres_pool_size,
                )
                .await?;
                ensure_schema(&pool).await?;
                info!("Connected to PostgreSQL");
                Self::with_postgres(config, pool).map_err(metrics_error)
            }
        }
    }

    fn with_postgres(config: AppConfig, pool: PgPool) -> prometheus::Result<Self> {
        let (users, entries, cache_stats) = wrap_with_cache(
            &config,
            PgUserRepository::new(pool.clone()),
            PgEntryRepository::new(pool.clone()),
        );

        let store = PgSessionStore::new(pool);
        spawn_session_purge(store.clone(), Duration::from_secs(300));

        let mut state = Self::new(config, users, entries, Arc::new(store))?;
        state.cache_stats = cache_stats;
        Ok(state)
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn is_ready(&self) -> bool {
        self.is_ready.load(Ordering::SeqCst)
    }

    pub fn set_ready(&self, ready: bool) {
        self.is_ready.store(ready, Ordering::SeqCst);
    }
}

fn metrics_error(e: prometheus::Error) -> DiaryError {
    DiaryError::ConfigError(format!("metrics registry: {e}"))
}

type Repositories = (
    Arc<dyn UserRepository>,
    Arc<dyn EntryRepository>,
    Vec<Arc<CacheStats>>,
);

fn wrap_with_cache<U, E>(config: &AppConfig, users: U, entries: E) -> Repositories
where
    U: UserRepository + 'static,
    E: EntryRepository + 'static,
{
    if !config.cache.enabled {
        return (Arc::new(users), Arc::new(entries), Vec::new());
    }

    let users = CachedUserRepository::new(users, &config.cache);
    let entries = CachedEntryRepository::new(entries, &config.cache);
    let stats = vec![users.stats(), entries.stats()];
    (Arc::new(users), Arc::new(entries), stats)
}

fn spawn_session_purge(store: PgSessionStore, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            match store.purge_expired().await {
                Ok(0) => {}
                Ok(purged) => info!(purged, "Purged expired sessions"),
                Err(e) => warn!(error = %e, "Failed to purge expired sessions"),
            }
        }
    });
}
