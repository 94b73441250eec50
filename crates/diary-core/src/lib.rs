//! Diary Core - Domain models, repositories and shared types
//!
//! This crate defines the abstractions shared by the diary backend:
//! - User and diary entry models
//! - Common error types
//! - Repository traits with in-memory and PostgreSQL implementations
//! - Read-through cache decorators for repositories
//! - Configuration management

pub mod cache;
pub mod config;
pub mod memory;
pub mod postgres;

pub use cache::{CacheStats, CachedEntryRepository, CachedUserRepository};
pub use config::{
    AppConfig, AuthConfig, CacheConfig, ConfigError, DatabaseConfig, LoggingConfig,
    PasswordConfig, RateLimitConfig, ServerConfig, StorageBackend,
};
pub use memory::{MemoryEntryRepository, MemoryUserRepository};
pub use postgres::{PgEntryRepository, PgUserRepository};

// Re-exported so downstream crates share one sqlx version
pub use sqlx::PgPool;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for diary operations
#[derive(Error, Debug)]
pub enum DiaryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, DiaryError>;

/// Upper bound for every list operation
pub const MAX_LIST_LIMIT: usize = 100;

// ============================================================================
// Users
// ============================================================================

/// User identifier. Valid identifiers are strictly positive.
pub type UserId = i64;

/// Registered diary user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct User {
    #[schema(example = 1)]
    pub id: UserId,

    #[schema(example = "sammy")]
    pub username: String,

    #[schema(example = "sammy@gmail.com")]
    pub email: String,

    /// Argon2 PHC string, never serialized
    #[serde(skip)]
    pub password_hash: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Data required to create a user. The password is already hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Full replacement of a user's mutable fields
#[derive(Debug, Clone)]
pub struct UserChanges {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

// ============================================================================
// Entries
// ============================================================================

pub type EntryId = i64;

/// Image attached to a diary entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EntryImage {
    pub id: i64,
    #[schema(example = "https://cdn.example.com/beach.jpg")]
    pub url: String,
}

/// Diary entry owned by a single user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct Entry {
    pub id: EntryId,
    #[schema(example = "Day at the beach")]
    pub title: String,
    pub description: String,
    pub images: Vec<EntryImage>,
    pub owner_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub title: String,
    pub description: String,
    pub image_urls: Vec<String>,
    pub owner_id: UserId,
}

#[derive(Debug, Clone)]
pub struct EntryChanges {
    pub title: String,
    pub description: String,
    pub image_urls: Vec<String>,
}

/// Trim surrounding whitespace and escape HTML special characters
///
/// Applied to every free-text field before it reaches a repository.
pub fn normalize_text(input: &str) -> String {
    let trimmed = input.trim();
    let mut out = String::with_capacity(trimmed.len());
    for c in trimmed.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '\'' => out.push_str("&#39;"),
            '"' => out.push_str("&#34;"),
            _ => out.push(c),
        }
    }
    out
}

// ============================================================================
// Repository Traits
// ============================================================================

/// Persistence for user accounts
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user; fails with `Conflict` on duplicate username or email
    async fn create(&self, user: NewUser) -> Result<User>;

    /// Replace a user's mutable fields
    async fn update(&self, id: UserId, changes: UserChanges) -> Result<User>;

    /// Delete a user, returning the number of rows removed
    async fn delete(&self, id: UserId) -> Result<u64>;

    /// Fetch a user; fails with `NotFound` when absent
    async fn get_by_id(&self, id: UserId) -> Result<User>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    async fn list(&self, limit: usize) -> Result<Vec<User>>;
}

/// Persistence for diary entries
#[async_trait]
pub trait EntryRepository: Send + Sync {
    async fn create(&self, entry: NewEntry) -> Result<Entry>;

    /// Replace title, description and images of an entry
    async fn update(&self, id: EntryId, changes: EntryChanges) -> Result<Entry>;

    /// Delete an entry and its images, returning the number of entries removed
    async fn delete(&self, id: EntryId) -> Result<u64>;

    async fn get_by_id(&self, id: EntryId) -> Result<Entry>;

    /// Entries of one owner, newest first
    async fn list(&self, owner_id: UserId, limit: usize) -> Result<Vec<Entry>>;

    /// Remove every entry of an owner
    async fn delete_by_owner(&self, owner_id: UserId) -> Result<u64>;
}
