//! API handlers
//!
//! Shared extractors and helpers live here; endpoints are grouped by
//! resource in the submodules.

pub mod auth;
pub mod entries;
pub mod health;
pub mod users;

use crate::audit::{audit_log, extract_ip_address, AuditEvent};
use crate::auth::{AuthDetail, AuthError};
use crate::error::AppError;
use axum::{
    extract::{rejection::JsonRejection, FromRequest, Request},
    http::HeaderMap,
    Json,
};
use diary_core::{UserId, MAX_LIST_LIMIT};
use serde::{de::DeserializeOwned, Deserialize};
use utoipa::IntoParams;
use validator::{Validate, ValidationError};

/// JSON body that has passed field validation
///
/// Unreadable or malformed bodies and failed validation all answer 422.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidatedJson<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection: JsonRejection| AppError::Unprocessable(rejection.body_text()))?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Reject values that are empty once trimmed
pub(crate) fn non_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("blank"));
    }
    Ok(())
}

/// `?limit=` for list endpoints
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Maximum number of items (1-100, default 100)
    pub limit: Option<usize>,
}

impl ListQuery {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(MAX_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT)
    }
}

/// Ownership check with an audit trail for denied access
pub(crate) fn authorize(
    auth: &AuthDetail,
    owner_id: UserId,
    resource: &str,
    headers: &HeaderMap,
) -> Result<(), AppError> {
    auth.require_owner(owner_id).map_err(|err| {
        if matches!(err, AuthError::Forbidden) {
            audit_log(&AuditEvent::AccessDenied {
                user_id: auth.user_id,
                resource: resource.to_string(),
                ip_address: extract_ip_address(headers),
            });
        }
        AppError::from(err)
    })
}
