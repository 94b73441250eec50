//! Session store adapters
//!
//! Maps a session ID to the user ID it was issued for. Every entry carries
//! its own expiry; an entry that is absent or expired means the session is
//! no longer live, whatever the token says.

use async_trait::async_trait;
use chrono::Utc;
use diary_core::{PgPool, UserId};
use moka::future::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// TTL-bound mapping from session ID to user ID
///
/// All operations are single-key; atomicity is delegated to the backend.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError>;

    /// Insert or replace a session with its own time-to-live
    async fn put(&self, session_id: &str, user_id: UserId, ttl: Duration)
        -> Result<(), StoreError>;

    async fn get(&self, session_id: &str) -> Result<Option<UserId>, StoreError>;

    /// Remove a session, returning how many live entries were deleted
    async fn delete(&self, session_id: &str) -> Result<u64, StoreError>;

    /// Remove every session issued for a user
    async fn delete_by_user(&self, user_id: UserId) -> Result<u64, StoreError>;
}

// ============================================================================
// In-memory store
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct StoredSession {
    user_id: UserId,
    ttl: Duration,
}

struct SessionExpiry;

impl Expiry<String, StoredSession> for SessionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &StoredSession,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredSession,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Process-local session store with per-entry expiry
///
/// Unbounded: live sessions leave only through expiry or deletion, never
/// through size-based eviction.
#[derive(Clone)]
pub struct MemorySessionStore {
    sessions: Cache<String, StoredSession>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        let sessions = Cache::builder()
            .expire_after(SessionExpiry)
            .build();
        Self { sessions }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.sessions.get(session_id).await.is_some())
    }

    async fn put(
        &self,
        session_id: &str,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.sessions
            .insert(session_id.to_string(), StoredSession { user_id, ttl })
            .await;
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<UserId>, StoreError> {
        Ok(self.sessions.get(session_id).await.map(|s| s.user_id))
    }

    async fn delete(&self, session_id: &str) -> Result<u64, StoreError> {
        Ok(self.sessions.remove(session_id).await.map_or(0, |_| 1))
    }

    async fn delete_by_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let owned: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.user_id == user_id)
            .map(|(key, _)| (*key).clone())
            .collect();

        let mut removed = 0;
        for key in owned {
            if self.sessions.remove(&key).await.is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ============================================================================
// PostgreSQL store
// ============================================================================

/// Session store shared by every server instance through PostgreSQL
///
/// Expired rows are invisible to reads and deletes; [`purge_expired`]
/// reclaims them.
///
/// [`purge_expired`]: PgSessionStore::purge_expired
#[derive(Clone)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Delete rows whose expiry has passed
    pub async fn purge_expired(&self) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(result.rows_affected())
    }
}

fn unavailable(e: sqlx::Error) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(session_id).await?.is_some())
    }

    async fn put(
        &self,
        session_id: &str,
        user_id: UserId,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("invalid ttl: {e}")))?;
        let expires_at = Utc::now() + ttl;

        sqlx::query(
            r#"
            INSERT INTO sessions (id, user_id, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET user_id = EXCLUDED.user_id, expires_at = EXCLUDED.expires_at
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .bind(expires_at)
        .execute(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<UserId>, StoreError> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT user_id FROM sessions WHERE id = $1 AND expires_at > NOW()")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;

        Ok(row.map(|(user_id,)| user_id))
    }

    async fn delete(&self, session_id: &str) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE id = $1 AND expires_at > NOW()")
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected())
    }

    async fn delete_by_user(&self, user_id: UserId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM sessions WHERE user_id = $1 AND expires_at > NOW()")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(unavailable)?;

        Ok(result.rows_affected())
    }
}
