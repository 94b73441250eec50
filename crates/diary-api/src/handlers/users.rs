//! User account handlers
//!
//! Registration and reads are public. Updating or deleting an account
//! requires a live session belonging to that account.

use super::{authorize, non_blank, ListQuery, ValidatedJson};
use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::auth::{hash_password_async, AuthDetail};
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use diary_core::{normalize_text, NewUser, User, UserChanges, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use utoipa::ToSchema;
use validator::Validate;

/// Account fields for registration and full updates
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct UserRequest {
    #[schema(example = "sammy")]
    #[validate(custom(function = "non_blank"), length(max = 255))]
    pub username: String,

    #[schema(example = "sammy@gmail.com")]
    #[validate(email, length(max = 100))]
    pub email: String,

    #[schema(example = "password")]
    #[validate(length(min = 1, max = 100))]
    pub password: String,
}

struct Account {
    username: String,
    email: String,
    password_hash: String,
}

async fn prepare(state: &AppState, request: UserRequest) -> Result<Account, AppError> {
    let password_hash = hash_password_async(request.password, state.config.auth.password.clone())
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;

    Ok(Account {
        username: normalize_text(&request.username),
        email: normalize_text(&request.email),
        password_hash,
    })
}

/// Register a new user
#[utoipa::path(
    post,
    path = "/users",
    tag = "users",
    request_body = UserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 409, description = "Username or email taken", body = crate::error::ApiError),
        (status = 422, description = "Invalid request body", body = crate::error::ApiError),
    )
)]
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ValidatedJson(request): ValidatedJson<UserRequest>,
) -> Result<impl IntoResponse, AppError> {
    let account = prepare(&state, request).await?;
    let user = state
        .users
        .create(NewUser {
            username: account.username,
            email: account.email,
            password_hash: account.password_hash,
        })
        .await?;

    audit_log(&AuditEvent::RegistrationSuccess {
        user_id: user.id,
        email: user.email.clone(),
        ip_address: extract_ip_address(&headers),
    });

    let location = format!("/users/{}", user.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(user)))
}

/// List users
#[utoipa::path(
    get,
    path = "/users",
    tag = "users",
    params(ListQuery),
    responses((status = 200, description = "Users", body = Vec<User>))
)]
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<User>>, AppError> {
    Ok(Json(state.users.list(query.limit()).await?))
}

/// Get a user by ID
#[utoipa::path(
    get,
    path = "/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    )
)]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, AppError> {
    Ok(Json(state.users.get_by_id(id).await?))
}

/// Replace the caller's own account details
#[utoipa::path(
    put,
    path = "/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    request_body = UserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not the account owner", body = crate::error::ApiError),
        (status = 409, description = "Username or email taken", body = crate::error::ApiError),
        (status = 422, description = "Invalid request body", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
    ValidatedJson(request): ValidatedJson<UserRequest>,
) -> Result<Json<User>, AppError> {
    authorize(&auth, id, "user", &headers)?;

    let account = prepare(&state, request).await?;
    let user = state
        .users
        .update(
            id,
            UserChanges {
                username: account.username,
                email: account.email,
                password_hash: account.password_hash,
            },
        )
        .await?;

    Ok(Json(user))
}

/// Delete the caller's own account
///
/// Removes the account's entries and ends the session used for the request.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    tag = "users",
    params(("id" = i64, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "Not the account owner", body = crate::error::ApiError),
        (status = 404, description = "User not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<UserId>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
) -> Result<StatusCode, AppError> {
    authorize(&auth, id, "user", &headers)?;

    let removed_entries = state.entries.delete_by_owner(id).await?;
    if state.users.delete(id).await? == 0 {
        return Err(AppError::NotFound(format!("User {id}")));
    }
    info!(user_id = id, removed_entries, "User deleted");

    if let Err(e) = state.sessions.revoke_user(id).await {
        warn!(user_id = id, error = %e, "Failed to revoke sessions of deleted user");
    }

    Ok(StatusCode::NO_CONTENT)
}
