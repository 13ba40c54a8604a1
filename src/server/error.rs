//! API error type and its HTTP mapping.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::common::errors::ChatLogError;

/// Errors surfaced by the HTTP handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// No verified session.
    #[error("{0}")]
    Unauthorized(String),
    /// Caller lacks access to the resource.
    #[error("{0}")]
    Forbidden(String),
    /// Resource does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Resource already exists.
    #[error("{0}")]
    Conflict(String),
    /// Malformed request.
    #[error("{0}")]
    BadRequest(String),
    /// Request body is not JSON.
    #[error("{0}")]
    UnsupportedMediaType(String),
    /// Unexpected persistence failure.
    #[error("storage failure: {0}")]
    Storage(#[source] ChatLogError),
}

impl ApiError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound(_) => "not_found",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) => "bad_request",
            Self::UnsupportedMediaType(_) => "unsupported_media_type",
            Self::Storage(_) => "internal_error",
        }
    }
}

impl From<ChatLogError> for ApiError {
    fn from(err: ChatLogError) -> Self {
        match err {
            ChatLogError::DuplicateKey(id) => {
                Self::Conflict(format!("chat log already exists for conversation {id}"))
            }
            ChatLogError::InvalidRecord(message) => Self::BadRequest(message),
            other => Self::Storage(other),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(err) => {
                Self::UnsupportedMediaType(err.body_text())
            }
            other => Self::BadRequest(other.body_text()),
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error detail.
    pub error: ErrorDetail,
}

/// Error detail.
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if let Self::Storage(err) = &self {
            tracing::error!(error = %err, "chat log request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code().to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::Unauthorized("x".into()).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ApiError::Forbidden("x".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            ApiError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_store_errors_are_classified() {
        let conflict = ApiError::from(ChatLogError::DuplicateKey("c1".into()));
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);

        let invalid = ApiError::from(ChatLogError::InvalidRecord("model must not be empty".into()));
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let storage = ApiError::from(ChatLogError::InvalidConfig("boom".into()));
        assert_eq!(storage.error_code(), "internal_error");
    }

    #[tokio::test]
    async fn test_storage_error_body_is_opaque() {
        let err = ApiError::from(ChatLogError::InvalidConfig("secret path /var/db".into()));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "internal server error");
        assert!(!String::from_utf8_lossy(&bytes).contains("/var/db"));
    }
}
