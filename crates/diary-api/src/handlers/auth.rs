//! Authentication API handlers
//!
//! Login, logout and token refresh. Every outcome is written to the audit
//! log; clients only ever see the uniform "Unauthorized" body on failure.

use super::{non_blank, ValidatedJson};
use crate::audit::{audit_log, extract_ip_address, extract_user_agent, AuditEvent};
use crate::auth::{AuthDetail, AuthError, TokenResponse};
use crate::error::AppError;
use crate::state::AppState;
use axum::{extract::State, http::HeaderMap, Extension, Json};
use diary_core::normalize_text;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Login request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct LoginRequest {
    #[schema(example = "sammy@gmail.com")]
    #[validate(custom(function = "non_blank"))]
    pub email: String,

    #[schema(example = "password")]
    #[validate(length(min = 1))]
    pub password: String,
}

/// Refresh request
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct RefreshRequest {
    #[validate(custom(function = "non_blank"))]
    pub refresh_token: String,
}

/// Login with email and password
///
/// Opens an access session and a refresh session and returns both tokens.
#[utoipa::path(
    post,
    path = "/auth/login",
    tag = "auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = crate::error::ApiError),
        (status = 422, description = "Malformed request body", body = crate::error::ApiError),
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let email = normalize_text(&request.email);

    match state.sessions.login(&email, &request.password).await {
        Ok(detail) => {
            audit_log(&AuditEvent::LoginSuccess {
                user_id: detail.user_id,
                email,
                ip_address: extract_ip_address(&headers),
                user_agent: extract_user_agent(&headers),
            });
            Ok(Json(detail.to_response()))
        }
        Err(err) => {
            if !matches!(err, AuthError::Persistence(_)) {
                audit_log(&AuditEvent::LoginFailure {
                    email,
                    reason: err.to_string(),
                    ip_address: extract_ip_address(&headers),
                    user_agent: extract_user_agent(&headers),
                });
            }
            Err(err.into())
        }
    }
}

/// Logout the current session
///
/// Revokes the access session the request was authenticated with. The
/// token is rejected from then on even though it has not expired.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "auth",
    responses(
        (status = 200, description = "Logout successful", body = String),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 500, description = "Session store failure", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
) -> Result<Json<&'static str>, AppError> {
    state.sessions.logout(&auth.session_id).await?;

    audit_log(&AuditEvent::Logout {
        user_id: auth.user_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json("Logged out"))
}

/// Exchange a refresh token for a new token pair
///
/// The presented refresh token is revoked; replaying it fails.
#[utoipa::path(
    post,
    path = "/auth/token/refresh",
    tag = "auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenResponse),
        (status = 401, description = "Invalid or revoked refresh token", body = crate::error::ApiError),
        (status = 500, description = "Session store failure", body = crate::error::ApiError),
    )
)]
pub async fn refresh_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let detail = state.sessions.refresh(request.refresh_token.trim()).await?;

    audit_log(&AuditEvent::TokenRefresh {
        user_id: detail.user_id,
        ip_address: extract_ip_address(&headers),
    });

    Ok(Json(detail.to_response()))
}
