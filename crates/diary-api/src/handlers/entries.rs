//! Diary entry handlers
//!
//! All routes require a live session, and a caller only ever sees or
//! changes their own entries.

use super::{authorize, non_blank, ListQuery, ValidatedJson};
use crate::auth::AuthDetail;
use crate::error::AppError;
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use diary_core::{normalize_text, Entry, EntryChanges, EntryId, NewEntry, UserId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;
use validator::Validate;

/// Entry fields for creation and full updates
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate)]
pub struct EntryRequest {
    #[schema(example = "Day at the beach")]
    #[validate(custom(function = "non_blank"), length(max = 255))]
    pub title: String,

    #[schema(example = "Sunny, a little windy.")]
    #[validate(custom(function = "non_blank"), length(max = 255))]
    pub description: String,

    /// Image URLs; replaces the entry's images on update
    #[serde(default)]
    #[validate(length(max = 20))]
    pub image_urls: Vec<String>,

    /// Must be the caller's own ID when present
    #[serde(default)]
    pub owner_id: Option<UserId>,
}

impl EntryRequest {
    fn image_urls(&self) -> Vec<String> {
        self.image_urls
            .iter()
            .map(|url| url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string)
            .collect()
    }
}

/// Create an entry owned by the caller
#[utoipa::path(
    post,
    path = "/entries",
    tag = "entries",
    request_body = EntryRequest,
    responses(
        (status = 201, description = "Entry created", body = Entry),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
        (status = 403, description = "owner_id is not the caller", body = crate::error::ApiError),
        (status = 422, description = "Invalid request body", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn create_entry(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
    ValidatedJson(request): ValidatedJson<EntryRequest>,
) -> Result<impl IntoResponse, AppError> {
    authorize(
        &auth,
        request.owner_id.unwrap_or(auth.user_id),
        "entry",
        &headers,
    )?;

    let entry = state
        .entries
        .create(NewEntry {
            title: normalize_text(&request.title),
            description: normalize_text(&request.description),
            image_urls: request.image_urls(),
            owner_id: auth.user_id,
        })
        .await?;

    let location = format!("/entries/{}", entry.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(entry)))
}

/// List the caller's entries, newest first
#[utoipa::path(
    get,
    path = "/entries",
    tag = "entries",
    params(ListQuery),
    responses(
        (status = 200, description = "Entries", body = Vec<Entry>),
        (status = 401, description = "Unauthorized", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Extension(auth): Extension<AuthDetail>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Entry>>, AppError> {
    Ok(Json(
        state.entries.list(auth.user_id, query.limit()).await?,
    ))
}

/// Fetch an entry and check that the caller owns it
async fn owned_entry(
    state: &AppState,
    id: EntryId,
    auth: &AuthDetail,
    headers: &HeaderMap,
) -> Result<Entry, AppError> {
    let entry = state.entries.get_by_id(id).await?;
    authorize(auth, entry.owner_id, "entry", headers)?;
    Ok(entry)
}

#[utoipa::path(
    get,
    path = "/entries/{id}",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry ID")),
    responses(
        (status = 200, description = "Entry", body = Entry),
        (status = 403, description = "Entry belongs to another user", body = crate::error::ApiError),
        (status = 404, description = "Entry not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn get_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
) -> Result<Json<Entry>, AppError> {
    Ok(Json(owned_entry(&state, id, &auth, &headers).await?))
}

/// Replace title, description and images of an entry
#[utoipa::path(
    put,
    path = "/entries/{id}",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry ID")),
    request_body = EntryRequest,
    responses(
        (status = 200, description = "Entry updated", body = Entry),
        (status = 403, description = "Entry belongs to another user", body = crate::error::ApiError),
        (status = 404, description = "Entry not found", body = crate::error::ApiError),
        (status = 422, description = "Invalid request body", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn update_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
    ValidatedJson(request): ValidatedJson<EntryRequest>,
) -> Result<Json<Entry>, AppError> {
    let entry = owned_entry(&state, id, &auth, &headers).await?;
    if let Some(owner_id) = request.owner_id {
        // Entries cannot change hands
        authorize(&auth, owner_id, "entry", &headers)?;
    }

    let updated = state
        .entries
        .update(
            entry.id,
            EntryChanges {
                title: normalize_text(&request.title),
                description: normalize_text(&request.description),
                image_urls: request.image_urls(),
            },
        )
        .await?;

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/entries/{id}",
    tag = "entries",
    params(("id" = i64, Path, description = "Entry ID")),
    responses(
        (status = 204, description = "Entry deleted"),
        (status = 403, description = "Entry belongs to another user", body = crate::error::ApiError),
        (status = 404, description = "Entry not found", body = crate::error::ApiError),
    ),
    security(("bearer_auth" = []))
)]
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<EntryId>,
    headers: HeaderMap,
    Extension(auth): Extension<AuthDetail>,
) -> Result<StatusCode, AppError> {
    let entry = owned_entry(&state, id, &auth, &headers).await?;
    if state.entries.delete(entry.id).await? == 0 {
        return Err(AppError::NotFound(format!("Entry {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}
