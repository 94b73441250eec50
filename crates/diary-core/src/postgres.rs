//! PostgreSQL repositories
//!
//! Users, entries and entry images stored with SQLx runtime queries.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::{
    DiaryError, Entry, EntryChanges, EntryId, EntryImage, EntryRepository, NewEntry, NewUser,
    Result, User, UserChanges, UserId, UserRepository,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id BIGSERIAL PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        password_hash TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entries (
        id BIGSERIAL PRIMARY KEY,
        title TEXT NOT NULL,
        description TEXT NOT NULL,
        owner_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
        created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
        updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS entry_images (
        id BIGSERIAL PRIMARY KEY,
        entry_id BIGINT NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
        url TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id BIGINT NOT NULL,
        expires_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_entries_owner ON entries(owner_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_expires ON sessions(expires_at)",
    "CREATE INDEX IF NOT EXISTS idx_sessions_user ON sessions(user_id)",
];

/// Open a connection pool
pub async fn connect(database_url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
        .map_err(|e| DiaryError::DatabaseError(format!("PostgreSQL connection failed: {e}")))?;
    info!(max_connections, "PostgreSQL pool ready");
    Ok(pool)
}

/// Create tables and indexes when they do not exist yet
pub async fn ensure_schema(pool: &PgPool) -> Result<()> {
    for statement in SCHEMA {
        sqlx::query(statement)
            .execute(pool)
            .await
            .map_err(|e| DiaryError::DatabaseError(format!("Failed to apply schema: {e}")))?;
    }
    debug!(statements = SCHEMA.len(), "Schema applied");
    Ok(())
}

fn db_error(context: &str, err: sqlx::Error) -> DiaryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            let message = match db.constraint() {
                Some(c) if c.contains("email") => "Email is already taken",
                _ => "Username is already taken",
            };
            debug!(constraint = ?db.constraint(), "{context}: unique violation");
            return DiaryError::Conflict(message.to_string());
        }
    }
    warn!(error = %err, "{context}");
    DiaryError::DatabaseError(format!("{context}: {err}"))
}

// ============================================================================
// Users
// ============================================================================

/// User row from database
#[derive(Debug, FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password_hash: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password_hash,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// PostgreSQL user repository
#[derive(Clone)]
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    async fn create(&self, user: NewUser) -> Result<User> {
        let row: UserRow = sqlx::query_as(
            r#"
            INSERT INTO users (username, email, password_hash)
            VALUES ($1, $2, $3)
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("Failed to create user", e))?;

        Ok(row.into())
    }

    async fn update(&self, id: UserId, changes: UserChanges) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(
            r#"
            UPDATE users
            SET username = $2, email = $3, password_hash = $4, updated_at = NOW()
            WHERE id = $1
            RETURNING id, username, email, password_hash, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&changes.username)
        .bind(&changes.email)
        .bind(&changes.password_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to update user", e))?;

        row.map(User::from)
            .ok_or_else(|| DiaryError::NotFound(format!("User {id}")))
    }

    async fn delete(&self, id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete user", e))?;

        Ok(result.rows_affected())
    }

    async fn get_by_id(&self, id: UserId) -> Result<User> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get user", e))?;

        row.map(User::from)
            .ok_or_else(|| DiaryError::NotFound(format!("User {id}")))
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to find user", e))?;

        Ok(row.map(User::from))
    }

    async fn list(&self, limit: usize) -> Result<Vec<User>> {
        let rows: Vec<UserRow> = sqlx::query_as(
            "SELECT id, username, email, password_hash, created_at, updated_at FROM users ORDER BY id LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list users", e))?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

// ============================================================================
// Entries
// ============================================================================

/// Entry row from database
#[derive(Debug, FromRow)]
struct EntryRow {
    id: i64,
    title: String,
    description: String,
    owner_id: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Entry image row from database
#[derive(Debug, FromRow)]
struct ImageRow {
    id: i64,
    entry_id: i64,
    url: String,
}

impl EntryRow {
    fn into_entry(self, images: Vec<EntryImage>) -> Entry {
        Entry {
            id: self.id,
            title: self.title,
            description: self.description,
            images,
            owner_id: self.owner_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// PostgreSQL entry repository
#[derive(Clone)]
pub struct PgEntryRepository {
    pool: PgPool,
}

impl PgEntryRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn images_for(&self, entry_ids: &[i64]) -> Result<HashMap<i64, Vec<EntryImage>>> {
        let rows: Vec<ImageRow> = sqlx::query_as(
            "SELECT id, entry_id, url FROM entry_images WHERE entry_id = ANY($1) ORDER BY id",
        )
        .bind(entry_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to load entry images", e))?;

        let mut by_entry: HashMap<i64, Vec<EntryImage>> = HashMap::new();
        for row in rows {
            by_entry.entry(row.entry_id).or_default().push(EntryImage {
                id: row.id,
                url: row.url,
            });
        }
        Ok(by_entry)
    }

    async fn insert_images(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        entry_id: EntryId,
        urls: &[String],
    ) -> Result<()> {
        for url in urls {
            sqlx::query("INSERT INTO entry_images (entry_id, url) VALUES ($1, $2)")
                .bind(entry_id)
                .bind(url)
                .execute(&mut **tx)
                .await
                .map_err(|e| db_error("Failed to store entry image", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntryRepository for PgEntryRepository {
    async fn create(&self, entry: NewEntry) -> Result<Entry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let row: EntryRow = sqlx::query_as(
            r#"
            INSERT INTO entries (title, description, owner_id)
            VALUES ($1, $2, $3)
            RETURNING id, title, description, owner_id, created_at, updated_at
            "#,
        )
        .bind(&entry.title)
        .bind(&entry.description)
        .bind(entry.owner_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to create entry", e))?;

        Self::insert_images(&mut tx, row.id, &entry.image_urls).await?;
        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit entry", e))?;

        self.get_by_id(row.id).await
    }

    async fn update(&self, id: EntryId, changes: EntryChanges) -> Result<Entry> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("Failed to begin transaction", e))?;

        let updated = sqlx::query(
            "UPDATE entries SET title = $2, description = $3, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(&changes.title)
        .bind(&changes.description)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error("Failed to update entry", e))?;

        if updated.rows_affected() == 0 {
            return Err(DiaryError::NotFound(format!("Entry {id}")));
        }

        sqlx::query("DELETE FROM entry_images WHERE entry_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("Failed to replace entry images", e))?;
        Self::insert_images(&mut tx, id, &changes.image_urls).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("Failed to commit entry", e))?;

        self.get_by_id(id).await
    }

    async fn delete(&self, id: EntryId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete entry", e))?;

        Ok(result.rows_affected())
    }

    async fn get_by_id(&self, id: EntryId) -> Result<Entry> {
        let row: Option<EntryRow> = sqlx::query_as(
            "SELECT id, title, description, owner_id, created_at, updated_at FROM entries WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("Failed to get entry", e))?;

        let row = row.ok_or_else(|| DiaryError::NotFound(format!("Entry {id}")))?;
        let mut images = self.images_for(&[row.id]).await?;
        let entry_images = images.remove(&row.id).unwrap_or_default();
        Ok(row.into_entry(entry_images))
    }

    async fn list(&self, owner_id: UserId, limit: usize) -> Result<Vec<Entry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(
            r#"
            SELECT id, title, description, owner_id, created_at, updated_at
            FROM entries
            WHERE owner_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(owner_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("Failed to list entries", e))?;

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut images = self.images_for(&ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let entry_images = images.remove(&row.id).unwrap_or_default();
                row.into_entry(entry_images)
            })
            .collect())
    }

    async fn delete_by_owner(&self, owner_id: UserId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM entries WHERE owner_id = $1")
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Failed to delete entries", e))?;

        Ok(result.rows_affected())
    }
}
