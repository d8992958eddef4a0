use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::InvalidImageId;
use serde::Serialize;

use crate::services::{IngestError, PublishError, ServeError};
use crate::store::StoreError;

/// Structured error response returned by all endpoints on failure.
#[derive(Serialize, utoipa::ToSchema)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `VALIDATION_ERROR`, `TOKEN_MISSING`,
    /// `TOKEN_INVALID`, `NOT_FOUND`, `UPSTREAM_FETCH_FAILED`, `STORE_UNAVAILABLE`,
    /// `INTERNAL_ERROR`.
    #[schema(example = "VALIDATION_ERROR")]
    pub code: &'static str,
    /// Human-readable error description.
    #[schema(example = "host '127.0.0.1' is not allowed")]
    pub message: String,
}

/// Application-level error type.
#[derive(Debug)]
pub enum AppError {
    Validation(String),
    TokenMissing,
    TokenInvalid,
    NotFound(String),
    UpstreamFetchFailed(String),
    StoreUnavailable(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::Validation(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "VALIDATION_ERROR",
                    message: msg,
                },
            ),
            AppError::TokenMissing => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_MISSING",
                    message: "Authentication required".into(),
                },
            ),
            AppError::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                ErrorBody {
                    code: "TOKEN_INVALID",
                    message: "Invalid token".into(),
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::UpstreamFetchFailed(msg) => (
                StatusCode::BAD_GATEWAY,
                ErrorBody {
                    code: "UPSTREAM_FETCH_FAILED",
                    message: msg,
                },
            ),
            AppError::StoreUnavailable(detail) => {
                tracing::warn!("Store unavailable: {}", detail);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ErrorBody {
                        code: "STORE_UNAVAILABLE",
                        message: "Storage is temporarily unavailable".into(),
                    },
                )
            }
            AppError::Internal(detail) => {
                tracing::error!("Internal error: {}", detail);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        code: "INTERNAL_ERROR",
                        message: "An unexpected error occurred".into(),
                    },
                )
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = self.status_and_body();
        (status, Json(body)).into_response()
    }
}

impl From<InvalidImageId> for AppError {
    fn from(err: InvalidImageId) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Corrupt(detail) => AppError::Internal(detail),
            other => AppError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<ServeError> for AppError {
    fn from(err: ServeError) -> Self {
        match err {
            ServeError::NotFound(id) => AppError::NotFound(format!("Image {id} not found")),
            ServeError::StoreUnavailable(detail) => AppError::StoreUnavailable(detail),
        }
    }
}

impl From<IngestError> for AppError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Validation(msg) => AppError::Validation(msg),
            IngestError::UpstreamFetchFailed(msg) => {
                tracing::warn!("Source fetch failed: {msg}");
                AppError::UpstreamFetchFailed(msg)
            }
            IngestError::StoreUnavailable(detail) => AppError::StoreUnavailable(detail),
        }
    }
}

impl From<PublishError> for AppError {
    fn from(err: PublishError) -> Self {
        match err {
            PublishError::Empty => AppError::Validation(err.to_string()),
            PublishError::NotFound(id) => AppError::NotFound(format!("Image {id} not found")),
            PublishError::StoreUnavailable(detail) => AppError::StoreUnavailable(detail),
        }
    }
}
