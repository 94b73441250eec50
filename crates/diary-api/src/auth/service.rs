//! Session manager
//!
//! Owns the session lifecycle: login mints an access and a refresh session,
//! logout revokes the access session, refresh rotates the refresh session,
//! and authenticate resolves a presented access token to a user.
//!
//! A session is live while its token is unexpired AND its session store
//! entry exists. Store writes complete before tokens are handed out.

use super::guard::require_owner;
use super::middleware::AuthError;
use super::password::{hash_password_async, verify_password_async};
use super::session_store::SessionStore;
use super::token::{extract_bearer, issue_token, parse_token, TokenError, TokenKind};
use axum::http::{HeaderMap, Uri};
use chrono::Utc;
use diary_core::{AuthConfig, DiaryError, UserId, UserRepository};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Freshly minted access + refresh pair
#[derive(Debug, Clone)]
pub struct TokenDetail {
    pub user_id: UserId,
    pub access_token: String,
    pub refresh_token: String,
    pub access_session_id: String,
    pub refresh_session_id: String,
    /// Unix seconds
    pub access_expires_at: i64,
    /// Unix seconds
    pub refresh_expires_at: i64,
    pub issued_at: i64,
}

impl TokenDetail {
    /// Response body; session IDs stay inside their tokens
    pub fn to_response(&self) -> TokenResponse {
        TokenResponse {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_type: "Bearer".to_string(),
            expires_in: (self.access_expires_at - self.issued_at).max(0) as u64,
        }
    }
}

/// Token pair response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    /// Access token lifetime in seconds
    #[schema(example = 300)]
    pub expires_in: u64,
}

/// Authenticated session resolved from an access token
///
/// Added to request extensions by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthDetail {
    pub session_id: String,
    pub user_id: UserId,
}

impl AuthDetail {
    pub fn require_owner(&self, owner_id: UserId) -> Result<(), AuthError> {
        require_owner(self.user_id, owner_id)
    }
}

/// Absolute expiry for a lifetime in seconds
fn expires_at(now: i64, ttl_secs: u64) -> Result<i64, AuthError> {
    i64::try_from(ttl_secs)
        .ok()
        .and_then(|ttl| now.checked_add(ttl))
        .ok_or_else(|| AuthError::Persistence(format!("token lifetime {ttl_secs}s out of range")))
}

/// Remaining lifetime of a token, never below one second
fn ttl_until(expires_at: i64, now: i64) -> Duration {
    Duration::from_secs((expires_at - now).max(1) as u64)
}

/// Plaintext hashed once to give unknown-email logins a hash to verify against
const DUMMY_PASSWORD: &str = "daily-diary-no-such-user";

pub struct SessionManager {
    config: AuthConfig,
    store: Arc<dyn SessionStore>,
    users: Arc<dyn UserRepository>,
    dummy_hash: OnceCell<String>,
}

impl SessionManager {
    pub fn new(
        config: AuthConfig,
        store: Arc<dyn SessionStore>,
        users: Arc<dyn UserRepository>,
    ) -> Self {
        Self {
            config,
            store,
            users,
            dummy_hash: OnceCell::new(),
        }
    }

    /// Hash with the configured cost, built on first use
    async fn dummy_hash(&self) -> Option<&str> {
        let hash = self
            .dummy_hash
            .get_or_try_init(|| {
                hash_password_async(DUMMY_PASSWORD.to_string(), self.config.password.clone())
            })
            .await;
        match hash {
            Ok(hash) => Some(hash.as_str()),
            Err(e) => {
                warn!(error = %e, "Failed to build dummy password hash");
                None
            }
        }
    }

    /// Verify credentials and open a new session pair
    ///
    /// Unknown email and wrong password both yield `InvalidCredentials`
    /// after the same amount of password hashing work.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenDetail, AuthError> {
        let found = self
            .users
            .find_by_email(email)
            .await
            .map_err(|e| AuthError::Persistence(e.to_string()))?;

        let Some(user) = found else {
            debug!(email = %email, "Login for unknown email");
            if let Some(hash) = self.dummy_hash().await {
                let _ = verify_password_async(password.to_string(), hash.to_string()).await;
            }
            return Err(AuthError::InvalidCredentials);
        };

        match verify_password_async(password.to_string(), user.password_hash.clone()).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(user_id = user.id, "Password mismatch");
                return Err(AuthError::InvalidCredentials);
            }
            Err(e) => {
                warn!(user_id = user.id, error = %e, "Stored password hash unusable");
                return Err(AuthError::InvalidCredentials);
            }
        }

        if user.id <= 0 {
            warn!(user_id = user.id, "Refusing session for non-positive user id");
            return Err(AuthError::InvalidCredentials);
        }

        self.create_session(user.id).await
    }

    /// Revoke an access session
    pub async fn logout(&self, session_id: &str) -> Result<(), AuthError> {
        let deleted = self.store.delete(session_id).await?;
        if deleted == 0 {
            debug!(session_id = %session_id, "Logout for a session that is not live");
            return Err(AuthError::Revocation);
        }
        Ok(())
    }

    /// Revoke every session of a user
    pub async fn revoke_user(&self, user_id: UserId) -> Result<u64, AuthError> {
        let revoked = self.store.delete_by_user(user_id).await?;
        info!(user_id, revoked, "User sessions revoked");
        Ok(revoked)
    }

    /// Exchange a refresh token for a new pair
    ///
    /// The presented refresh session is revoked; replaying it afterwards
    /// fails with `SessionRevoked`, as does refreshing for a user that no
    /// longer exists. Nothing is written unless the token verifies.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenDetail, AuthError> {
        let claims = parse_token(&self.config, TokenKind::Refresh, refresh_token)?;
        let user_id = claims.user_id()?;

        match self.store.get(&claims.sid).await? {
            None => return Err(AuthError::SessionRevoked),
            Some(stored) if stored != user_id => {
                warn!(session_id = %claims.sid, "Refresh session bound to another user");
                return Err(AuthError::InvalidToken(TokenError::InvalidSubject));
            }
            Some(_) => {}
        }

        match self.users.get_by_id(user_id).await {
            Ok(_) => {}
            Err(DiaryError::NotFound(_)) => {
                debug!(user_id, "Refresh for a deleted user");
                self.store.delete(&claims.sid).await?;
                return Err(AuthError::SessionRevoked);
            }
            Err(e) => return Err(AuthError::Persistence(e.to_string())),
        }

        // Only one concurrent refresh wins the delete
        if self.store.delete(&claims.sid).await? == 0 {
            return Err(AuthError::SessionRevoked);
        }

        self.create_session(user_id).await
    }

    /// Resolve the bearer token of a request
    pub async fn authenticate(
        &self,
        uri: &Uri,
        headers: &HeaderMap,
    ) -> Result<AuthDetail, AuthError> {
        let token = extract_bearer(uri, headers).ok_or(AuthError::MissingToken)?;
        self.authenticate_token(&token).await
    }

    /// Resolve an access token to its live session
    pub async fn authenticate_token(&self, token: &str) -> Result<AuthDetail, AuthError> {
        let claims = parse_token(&self.config, TokenKind::Access, token)?;
        let user_id = claims.user_id()?;

        match self.store.get(&claims.sid).await? {
            Some(stored) if stored == user_id => Ok(AuthDetail {
                session_id: claims.sid,
                user_id,
            }),
            Some(_) => Err(AuthError::InvalidToken(TokenError::InvalidSubject)),
            None => Err(AuthError::SessionRevoked),
        }
    }

    async fn create_session(&self, user_id: UserId) -> Result<TokenDetail, AuthError> {
        let now = Utc::now().timestamp();
        let access_expires_at = expires_at(now, self.config.access_ttl_secs)?;
        let refresh_expires_at = expires_at(now, self.config.refresh_ttl_secs)?;
        let access_session_id = Uuid::new_v4().to_string();
        let refresh_session_id = Uuid::new_v4().to_string();

        let access_token = issue_token(
            &self.config,
            TokenKind::Access,
            &access_session_id,
            user_id,
            access_expires_at,
        )
        .map_err(|e| AuthError::Persistence(e.to_string()))?;
        let refresh_token = issue_token(
            &self.config,
            TokenKind::Refresh,
            &refresh_session_id,
            user_id,
            refresh_expires_at,
        )
        .map_err(|e| AuthError::Persistence(e.to_string()))?;

        let detail = TokenDetail {
            user_id,
            access_token,
            refresh_token,
            access_session_id,
            refresh_session_id,
            access_expires_at,
            refresh_expires_at,
            issued_at: now,
        };

        if let Err(e) = self.persist(&detail, now).await {
            self.discard(&detail).await;
            return Err(AuthError::Persistence(e.to_string()));
        }

        Ok(detail)
    }

    async fn persist(
        &self,
        detail: &TokenDetail,
        now: i64,
    ) -> Result<(), super::session_store::StoreError> {
        self.store
            .put(
                &detail.access_session_id,
                detail.user_id,
                ttl_until(detail.access_expires_at, now),
            )
            .await?;
        self.store
            .put(
                &detail.refresh_session_id,
                detail.user_id,
                ttl_until(detail.refresh_expires_at, now),
            )
            .await
    }

    /// Best-effort removal of a half-written session pair
    async fn discard(&self, detail: &TokenDetail) {
        for session_id in [&detail.access_session_id, &detail.refresh_session_id] {
            if let Err(e) = self.store.delete(session_id).await {
                warn!(session_id = %session_id, error = %e, "Failed to roll back session");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::password::hash_password;
    use super::super::session_store::{MemorySessionStore, StoreError};
    use super::*;
    use async_trait::async_trait;
    use diary_core::{MemoryUserRepository, NewUser, PasswordConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn config() -> AuthConfig {
        AuthConfig {
            access_secret: "access-secret".to_string(),
            refresh_secret: "refresh-secret".to_string(),
            password: light(),
            ..Default::default()
        }
    }

    fn light() -> PasswordConfig {
        PasswordConfig {
            memory_cost: 1024,
            time_cost: 1,
            parallelism: 1,
            output_len: Some(32),
        }
    }

    async fn users_with_sammy() -> Arc<MemoryUserRepository> {
        let users = Arc::new(MemoryUserRepository::new());
        users
            .create(NewUser {
                username: "sammy".to_string(),
                email: "sammy@gmail.com".to_string(),
                password_hash: hash_password("password", &light()).unwrap(),
            })
            .await
            .unwrap();
        users
    }

    async fn manager() -> (SessionManager, Arc<MemorySessionStore>) {
        let store = Arc::new(MemorySessionStore::default());
        let manager = SessionManager::new(config(), store.clone(), users_with_sammy().await);
        (manager, store)
    }

    /// Store that refuses every write after the first `allowed_puts`
    struct FlakyStore {
        inner: MemorySessionStore,
        allowed_puts: usize,
        puts: AtomicUsize,
        written: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionStore for FlakyStore {
        async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
            self.inner.exists(session_id).await
        }

        async fn put(
            &self,
            session_id: &str,
            user_id: UserId,
            ttl: Duration,
        ) -> Result<(), StoreError> {
            if self.puts.fetch_add(1, Ordering::SeqCst) >= self.allowed_puts {
                return Err(StoreError::Unavailable("connection refused".to_string()));
            }
            self.written.lock().unwrap().push(session_id.to_string());
            self.inner.put(session_id, user_id, ttl).await
        }

        async fn get(&self, session_id: &str) -> Result<Option<UserId>, StoreError> {
            self.inner.get(session_id).await
        }

        async fn delete(&self, session_id: &str) -> Result<u64, StoreError> {
            self.inner.delete(session_id).await
        }

        async fn delete_by_user(&self, user_id: UserId) -> Result<u64, StoreError> {
            self.inner.delete_by_user(user_id).await
        }
    }

    #[tokio::test]
    async fn test_login_issues_parseable_pair() {
        let (manager, store) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        let access = parse_token(&config(), TokenKind::Access, &detail.access_token).unwrap();
        let refresh = parse_token(&config(), TokenKind::Refresh, &detail.refresh_token).unwrap();
        assert_eq!(access.user_id(), Ok(detail.user_id));
        assert_eq!(refresh.user_id(), Ok(detail.user_id));
        assert_eq!(access.sid, detail.access_session_id);
        assert_eq!(refresh.sid, detail.refresh_session_id);

        assert_eq!(
            store.get(&detail.access_session_id).await.unwrap(),
            Some(detail.user_id)
        );
        assert!(store.exists(&detail.refresh_session_id).await.unwrap());

        let body = detail.to_response();
        assert_eq!(body.token_type, "Bearer");
        assert_eq!(body.expires_in, 300);
    }

    #[tokio::test]
    async fn test_login_failures_are_uniform() {
        let (manager, _) = manager().await;

        let unknown = manager.login("nobody@gmail.com", "password").await;
        let wrong = manager.login("sammy@gmail.com", "wrong").await;

        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));
        assert!(matches!(wrong, Err(AuthError::InvalidCredentials)));
    }

    #[tokio::test]
    async fn test_unknown_email_still_verifies_a_hash() {
        let (manager, _) = manager().await;
        assert!(manager.dummy_hash.get().is_none());

        let unknown = manager.login("nobody@gmail.com", "password").await;
        assert!(matches!(unknown, Err(AuthError::InvalidCredentials)));

        let hash = manager.dummy_hash.get().unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(!super::super::password::verify_password("password", hash).unwrap());
    }

    #[tokio::test]
    async fn test_logout_revokes_immediately() {
        let (manager, _) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        let auth = manager
            .authenticate_token(&detail.access_token)
            .await
            .unwrap();
        assert_eq!(auth.user_id, detail.user_id);

        manager.logout(&auth.session_id).await.unwrap();

        let again = manager.authenticate_token(&detail.access_token).await;
        assert!(matches!(again, Err(AuthError::SessionRevoked)));
    }

    #[tokio::test]
    async fn test_logout_twice() {
        let (manager, _) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        assert!(manager.logout(&detail.access_session_id).await.is_ok());
        assert!(matches!(
            manager.logout(&detail.access_session_id).await,
            Err(AuthError::Revocation)
        ));
    }

    #[tokio::test]
    async fn test_refresh_rotates_pair() {
        let (manager, store) = manager().await;
        let first = manager.login("sammy@gmail.com", "password").await.unwrap();

        let second = manager.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.access_session_id, first.access_session_id);
        assert_ne!(second.refresh_session_id, first.refresh_session_id);
        assert!(!store.exists(&first.refresh_session_id).await.unwrap());
        assert!(manager
            .authenticate_token(&second.access_token)
            .await
            .is_ok());

        let replay = manager.refresh(&first.refresh_token).await;
        assert!(matches!(replay, Err(AuthError::SessionRevoked)));
    }

    #[tokio::test]
    async fn test_refresh_with_bad_token_has_no_side_effects() {
        let (manager, store) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        // Access token presented as refresh token
        let wrong_kind = manager.refresh(&detail.access_token).await;
        assert!(matches!(wrong_kind, Err(AuthError::InvalidToken(_))));

        let expired = issue_token(
            &config(),
            TokenKind::Refresh,
            &detail.refresh_session_id,
            detail.user_id,
            Utc::now().timestamp() - 10,
        )
        .unwrap();
        assert!(matches!(
            manager.refresh(&expired).await,
            Err(AuthError::InvalidToken(TokenError::Expired))
        ));

        let mut tampered = detail.refresh_token.clone();
        tampered.push('x');
        assert!(matches!(
            manager.refresh(&tampered).await,
            Err(AuthError::InvalidToken(_))
        ));

        // The original pair is untouched
        assert!(store.exists(&detail.access_session_id).await.unwrap());
        assert!(store.exists(&detail.refresh_session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_authenticate_from_request() {
        let (manager, _) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        let uri: Uri = format!("/entries?token={}", detail.access_token)
            .parse()
            .unwrap();
        let auth = manager.authenticate(&uri, &HeaderMap::new()).await.unwrap();
        assert_eq!(auth.session_id, detail.access_session_id);

        let bare: Uri = "/entries".parse().unwrap();
        assert!(matches!(
            manager.authenticate(&bare, &HeaderMap::new()).await,
            Err(AuthError::MissingToken)
        ));
    }

    #[tokio::test]
    async fn test_refresh_token_cannot_authenticate() {
        let (manager, _) = manager().await;
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        assert!(matches!(
            manager.authenticate_token(&detail.refresh_token).await,
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_store_write_rolls_back() {
        let store = Arc::new(FlakyStore {
            inner: MemorySessionStore::default(),
            allowed_puts: 1,
            puts: AtomicUsize::new(0),
            written: Mutex::new(Vec::new()),
        });
        let manager = SessionManager::new(config(), store.clone(), users_with_sammy().await);

        let result = manager.login("sammy@gmail.com", "password").await;
        assert!(matches!(result, Err(AuthError::Persistence(_))));

        // The access session written before the failure was removed again
        let written = store.written.lock().unwrap().clone();
        assert_eq!(written.len(), 1);
        assert!(!store.inner.exists(&written[0]).await.unwrap());
    }

    #[tokio::test]
    async fn test_deleted_user_cannot_refresh() {
        let users = users_with_sammy().await;
        let store = Arc::new(MemorySessionStore::default());
        let manager = SessionManager::new(config(), store.clone(), users.clone());
        let detail = manager.login("sammy@gmail.com", "password").await.unwrap();

        users.delete(detail.user_id).await.unwrap();

        let refreshed = manager.refresh(&detail.refresh_token).await;
        assert!(matches!(refreshed, Err(AuthError::SessionRevoked)));
        assert!(!store.exists(&detail.refresh_session_id).await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_user_ends_every_session() {
        let (manager, store) = manager().await;
        let first = manager.login("sammy@gmail.com", "password").await.unwrap();
        let second = manager.login("sammy@gmail.com", "password").await.unwrap();

        assert_eq!(manager.revoke_user(first.user_id).await.unwrap(), 4);

        for detail in [&first, &second] {
            assert!(!store.exists(&detail.access_session_id).await.unwrap());
            assert!(matches!(
                manager.refresh(&detail.refresh_token).await,
                Err(AuthError::SessionRevoked)
            ));
        }
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_is_refused() {
        let store = Arc::new(MemorySessionStore::default());
        let config = AuthConfig {
            refresh_ttl_secs: u64::MAX,
            ..config()
        };
        let manager = SessionManager::new(config, store, users_with_sammy().await);

        let result = manager.login("sammy@gmail.com", "password").await;
        assert!(matches!(result, Err(AuthError::Persistence(_))));
    }
}
