//! API error handling

use crate::auth::AuthError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diary_core::DiaryError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use utoipa::ToSchema;

/// API error response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// Error code
    #[schema(example = "UNAUTHORIZED")]
    pub code: String,
    /// Human-readable message
    #[schema(example = "Unauthorized")]
    pub message: String,
    /// Additional details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Application error type
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    /// Malformed body or failed field validation
    Unprocessable(String),
    Conflict(String),
    Unauthorized,
    Forbidden,
    TooManyRequests,
    Internal(String),
    Database(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ApiError::new("NOT_FOUND", format!("{msg} not found")),
            ),
            AppError::Unprocessable(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ApiError::new("UNPROCESSABLE_ENTITY", "Invalid request body").with_details(msg),
            ),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, ApiError::new("CONFLICT", msg)),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ApiError::new("UNAUTHORIZED", "Unauthorized"),
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                ApiError::new("FORBIDDEN", "Access denied"),
            ),
            AppError::TooManyRequests => (
                StatusCode::TOO_MANY_REQUESTS,
                ApiError::new("TOO_MANY_REQUESTS", "Too many requests"),
            ),
            AppError::Internal(msg) => {
                error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("INTERNAL_ERROR", "Internal server error"),
                )
            }
            AppError::Database(msg) => {
                error!(error = %msg, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiError::new("DATABASE_ERROR", "Database operation failed"),
                )
            }
        };

        (status, Json(error)).into_response()
    }
}

impl From<DiaryError> for AppError {
    fn from(err: DiaryError) -> Self {
        match err {
            DiaryError::NotFound(msg) => AppError::NotFound(msg),
            DiaryError::Conflict(msg) => AppError::Conflict(msg),
            DiaryError::ValidationError(msg) => AppError::Unprocessable(msg),
            DiaryError::DatabaseError(msg) => AppError::Database(msg),
            DiaryError::ConfigError(msg) => AppError::Internal(format!("Configuration error: {msg}")),
            DiaryError::Other(err) => AppError::Internal(err.to_string()),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Forbidden => AppError::Forbidden,
            AuthError::Persistence(msg) => AppError::Internal(format!("Session store: {msg}")),
            other => {
                debug!(reason = %other, "Authentication failed");
                AppError::Unauthorized
            }
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Unprocessable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::TokenError;

    #[test]
    fn test_diary_error_mapping() {
        let cases = [
            (DiaryError::NotFound("User 1".into()), StatusCode::NOT_FOUND),
            (DiaryError::Conflict("taken".into()), StatusCode::CONFLICT),
            (
                DiaryError::ValidationError("title".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                DiaryError::DatabaseError("down".into()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }

    #[tokio::test]
    async fn test_auth_errors_share_one_message() {
        for err in [
            AuthError::InvalidCredentials,
            AuthError::InvalidToken(TokenError::InvalidSignature),
            AuthError::SessionRevoked,
        ] {
            let response = AppError::from(err).into_response();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(json["message"], "Unauthorized");
            assert!(json.get("details").is_none());
        }
    }
}
