//! Authentication middleware for protecting routes
//!
//! Resolves the request's bearer token through the [`SessionManager`] and
//! adds the resulting [`AuthDetail`] to request extensions. Handlers pick it
//! up with `Extension<AuthDetail>`.
//!
//! [`SessionManager`]: super::service::SessionManager
//! [`AuthDetail`]: super::service::AuthDetail

use super::session_store::StoreError;
use super::token::TokenError;
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use thiserror::Error;

/// Authentication and session errors
///
/// The HTTP mapping lives in `From<AuthError> for AppError`; every variant
/// except `Forbidden` and `Persistence` renders as a plain 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] TokenError),

    #[error("Session has been revoked")]
    SessionRevoked,

    #[error("Access denied")]
    Forbidden,

    #[error("Session persistence failed: {0}")]
    Persistence(String),

    #[error("Session is not active")]
    Revocation,
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        AuthError::Persistence(err.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        AppError::from(self).into_response()
    }
}

/// Require a live access session
///
/// ```ignore
/// let protected = Router::new()
///     .route("/entries", get(entries::list_entries))
///     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth = match state
        .sessions
        .authenticate(request.uri(), request.headers())
        .await
    {
        Ok(auth) => auth,
        Err(e) => {
            if !matches!(e, AuthError::MissingToken | AuthError::Persistence(_)) {
                audit_log(&AuditEvent::InvalidToken {
                    ip_address: extract_ip_address(request.headers()),
                    user_agent: extract_user_agent(request.headers()),
                    reason: e.to_string(),
                });
            }
            return Err(e);
        }
    };

    request.extensions_mut().insert(auth);
    Ok(next.run(request).await)
}
