//! Authentication and session management
//!
//! - Token codec for access and refresh JWTs
//! - Session store with per-entry expiry (in-memory or PostgreSQL)
//! - Session manager: login, logout, refresh, authenticate
//! - Middleware and ownership guard for protected routes
//! - Password hashing with Argon2

pub mod guard;
pub mod middleware;
pub mod password;
pub mod service;
pub mod session_store;
pub mod token;

pub use guard::require_owner;
pub use middleware::{auth_middleware, AuthError};
pub use password::{hash_password, hash_password_async, verify_password, verify_password_async};
pub use service::{AuthDetail, SessionManager, TokenDetail, TokenResponse};
pub use session_store::{MemorySessionStore, PgSessionStore, SessionStore, StoreError};
pub use token::{
    extract_bearer, issue_token, parse_token, SessionClaims, TokenError, TokenKind,
};
