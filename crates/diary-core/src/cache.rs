//! Read-through caching for repositories
//!
//! Wraps any [`UserRepository`] or [`EntryRepository`] and keeps recently
//! read records in a moka cache. Writes go to the inner repository first and
//! then invalidate the cached copy, so a reader never sees a record older
//! than the last successful write through the same decorator.
//!
//! Every write bumps a write generation before invalidating. A miss that
//! loaded from the inner repository while the generation moved drops what it
//! just cached, so a load that raced a write cannot outlive the write's
//! invalidation.

use async_trait::async_trait;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::CacheConfig;
use crate::{
    Entry, EntryChanges, EntryId, EntryRepository, NewEntry, NewUser, Result, User, UserChanges,
    UserId, UserRepository,
};

// ============================================================================
// Statistics
// ============================================================================

/// Hit/miss counters for one cache
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits() + self.misses();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }
}

/// Counter bumped by every write, read around each cache fill
#[derive(Debug, Default)]
struct WriteGeneration(AtomicU64);

impl WriteGeneration {
    fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn build_cache<K, V>(config: &CacheConfig) -> Cache<K, V>
where
    K: std::hash::Hash + Eq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Cache::builder()
        .max_capacity(config.max_capacity)
        .time_to_live(Duration::from_secs(config.ttl_secs))
        .support_invalidation_closures()
        .build()
}

// ============================================================================
// Users
// ============================================================================

/// Caching decorator for a user repository
pub struct CachedUserRepository<R> {
    inner: R,
    cache: Cache<UserId, User>,
    generation: WriteGeneration,
    stats: Arc<CacheStats>,
}

impl<R: UserRepository> CachedUserRepository<R> {
    pub fn new(inner: R, config: &CacheConfig) -> Self {
        Self {
            inner,
            cache: build_cache(config),
            generation: WriteGeneration::default(),
            stats: Arc::new(CacheStats::new("users")),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    async fn invalidate(&self, id: UserId) {
        self.generation.bump();
        self.cache.invalidate(&id).await;
        self.stats.record_invalidation();
        debug!(user_id = id, "Invalidated cached user");
    }
}

#[async_trait]
impl<R: UserRepository> UserRepository for CachedUserRepository<R> {
    async fn create(&self, user: NewUser) -> Result<User> {
        let created = self.inner.create(user).await?;
        self.cache.insert(created.id, created.clone()).await;
        Ok(created)
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<User> {
        let result = self.inner.update(id, changes).await;
        self.invalidate(id).await;
        result
    }

    async fn delete(&self, id: UserId) -> Result<u64> {
        let result = self.inner.delete(id).await;
        self.invalidate(id).await;
        result
    }

    async fn get_by_id(&self, id: UserId) -> Result<User> {
        if let Some(user) = self.cache.get(&id).await {
            self.stats.record(true);
            return Ok(user);
        }
        self.stats.record(false);

        let generation = self.generation.current();
        let user = self.inner.get_by_id(id).await?;
        self.cache.insert(id, user.clone()).await;
        if self.generation.current() != generation {
            self.cache.invalidate(&id).await;
        }
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        // Login path: always read the source of truth for credentials
        self.inner.find_by_email(email).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<User>> {
        self.inner.list(limit).await
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Caching decorator for an entry repository
pub struct CachedEntryRepository<R> {
    inner: R,
    cache: Cache<EntryId, Entry>,
    generation: WriteGeneration,
    stats: Arc<CacheStats>,
}

impl<R: EntryRepository> CachedEntryRepository<R> {
    pub fn new(inner: R, config: &CacheConfig) -> Self {
        Self {
            inner,
            cache: build_cache(config),
            generation: WriteGeneration::default(),
            stats: Arc::new(CacheStats::new("entries")),
        }
    }

    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    async fn invalidate(&self, id: EntryId) {
        self.generation.bump();
        self.cache.invalidate(&id).await;
        self.stats.record_invalidation();
        debug!(entry_id = id, "Invalidated cached entry");
    }
}

#[async_trait]
impl<R: EntryRepository> EntryRepository for CachedEntryRepository<R> {
    async fn create(&self, entry: NewEntry) -> Result<Entry> {
        let created = self.inner.create(entry).await?;
        self.cache.insert(created.id, created.clone()).await;
        Ok(created)
    }

    async fn update(&self, id: EntryId, changes: EntryChanges) -> Result<Entry> {
        let result = self.inner.update(id, changes).await;
        self.invalidate(id).await;
        result
    }

    async fn delete(&self, id: EntryId) -> Result<u64> {
        let result = self.inner.delete(id).await;
        self.invalidate(id).await;
        result
    }

    async fn get_by_id(&self, id: EntryId) -> Result<Entry> {
        if let Some(entry) = self.cache.get(&id).await {
            self.stats.record(true);
            return Ok(entry);
        }
        self.stats.record(false);

        let generation = self.generation.current();
        let entry = self.inner.get_by_id(id).await?;
        self.cache.insert(id, entry.clone()).await;
        if self.generation.current() != generation {
            self.cache.invalidate(&id).await;
        }
        Ok(entry)
    }

    async fn list(&self, owner_id: UserId, limit: usize) -> Result<Vec<Entry>> {
        self.inner.list(owner_id, limit).await
    }

    async fn delete_by_owner(&self, owner_id: UserId) -> Result<u64> {
        let removed = self.inner.delete_by_owner(owner_id).await?;
        if removed > 0 {
            self.generation.bump();
            if let Err(e) = self
                .cache
                .invalidate_entries_if(move |_, entry| entry.owner_id == owner_id)
            {
                debug!(owner_id, error = %e, "Predicate invalidation refused, clearing cache");
                self.cache.invalidate_all();
            }
            self.stats.record_invalidation();
        }
        Ok(removed)
    }
}
