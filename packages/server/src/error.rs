use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::ReferenceError;
use sea_orm::DbErr;
use serde::Serialize;

use crate::cache::CacheError;
use crate::origin::{FetchError, ResolveError};
use crate::transcode::TranscodeError;

/// Structured error response returned on failure.
#[derive(Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code. One of: `INVALID_REQUEST`, `NOT_FOUND`,
    /// `STORAGE_UNAVAILABLE`, `UPSTREAM_ERROR`, `PROTOCOL_ERROR`,
    /// `TOO_MANY_REDIRECTS`, `PAYLOAD_TOO_LARGE`, `UPSTREAM_STATUS`,
    /// `TRANSCODE_ERROR`, `INTERNAL_ERROR`.
    pub code: &'static str,
    pub message: String,
}

/// Request-level error type.
#[derive(Debug)]
pub enum AppError {
    InvalidRequest(String),
    NotFound(String),
    /// Object store failure or timeout.
    StorageUnavailable(String),
    /// Record store failure.
    Upstream(String),
    /// The origin could not be fetched.
    Origin(FetchError),
    /// The origin answered with an error status, passed through as is.
    UpstreamStatus(StatusCode),
    Transcode(String),
    Internal(String),
}

impl AppError {
    fn status_and_body(self) -> (StatusCode, ErrorBody) {
        match self {
            AppError::InvalidRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "INVALID_REQUEST",
                    message: msg,
                },
            ),
            AppError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    code: "NOT_FOUND",
                    message: msg,
                },
            ),
            AppError::StorageUnavailable(detail) => {
                tracing::error!("Object store error: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code: "STORAGE_UNAVAILABLE",
                        message: "Image storage is unavailable".into(),
                    },
                )
            }
            AppError::Upstream(detail) => {
                tracing::error!("Record store error: {}", detail);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code: "UPSTREAM_ERROR",
                        message: "Image records are unavailable".into(),
                    },
                )
            }
            AppError::Origin(err) => {
                tracing::warn!("Origin fetch failed: {}", err);
                let code = match &err {
                    FetchError::TooManyRedirects(_) => "TOO_MANY_REDIRECTS",
                    FetchError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
                    FetchError::Transport(_) => "UPSTREAM_ERROR",
                    FetchError::InvalidUrl(_)
                    | FetchError::RedirectWithoutLocation
                    | FetchError::InvalidLocation(_) => "PROTOCOL_ERROR",
                };
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorBody {
                        code,
                        message: err.to_string(),
                    },
                )
            }
            AppError::UpstreamStatus(status) => (
                status,
                ErrorBody {
                    code: "UPSTREAM_STATUS",
                    message: format!("Origin answered {}", status.as_u16()),
                },
            ),
            AppError::Transcode(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    code: "TRANSCODE_ERROR",
                    message: msg,
                },
            ),
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

impl From<ReferenceError> for AppError {
    fn from(err: ReferenceError) -> Self {
        match err {
            ReferenceError::UnknownEntity(_) => AppError::NotFound(err.to_string()),
            other => AppError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        AppError::StorageUnavailable(err.to_string())
    }
}

impl From<ResolveError> for AppError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::NotFound { .. } => AppError::NotFound(err.to_string()),
            ResolveError::Database(e) => e.into(),
        }
    }
}

impl From<DbErr> for AppError {
    fn from(err: DbErr) -> Self {
        AppError::Upstream(err.to_string())
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        AppError::Origin(err)
    }
}

impl From<TranscodeError> for AppError {
    fn from(err: TranscodeError) -> Self {
        match err {
            TranscodeError::DimensionTooLarge(_) => AppError::InvalidRequest(err.to_string()),
            TranscodeError::Decode(_)
            | TranscodeError::OutputTooLarge(..)
            | TranscodeError::Encode(_) => AppError::Transcode(err.to_string()),
        }
    }
}
