//! Typed errors and HTTP mapping.

use crate::dsl::Verb;
use crate::service::Phase;
use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Status used for calls the client abandoned (nginx convention).
pub const STATUS_CLIENT_CLOSED_REQUEST: u16 = 499;

/// Errors raised while registering and compiling resources. The process must refuse to serve on any of these.
#[derive(Error, Debug)]
pub enum BootError {
    #[error("resource already registered: {0}")]
    AlreadyRegistered(String),
    #[error("invalid DSL for {resource}: {message}")]
    InvalidDsl { resource: String, message: String },
    #[error("duplicate {verb} declaration for {resource}")]
    DuplicateActionDecl { resource: String, verb: Verb },
    #[error("path conflict: {0}")]
    PathConflict(String),
    #[error("registry is frozen")]
    FrozenRegistry,
    #[error("resource not registered: {0}")]
    NotFound(String),
    #[error("registry has not been compiled")]
    NotCompiled,
    #[error("settings: {0}")]
    Settings(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BootError {
    pub(crate) fn invalid_dsl(resource: &str, message: impl Into<String>) -> Self {
        BootError::InvalidDsl {
            resource: resource.to_string(),
            message: message.into(),
        }
    }
}

/// Errors surfaced by a service call.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
    #[error("canceled")]
    Canceled,
    #[error("internal error during {verb} {phase}: {message}")]
    Internal {
        verb: Verb,
        phase: Phase,
        message: String,
    },
}

impl AppError {
    pub fn internal(verb: Verb, phase: Phase, message: impl Into<String>) -> Self {
        AppError::Internal {
            verb,
            phase,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            AppError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Canceled => StatusCode::from_u16(STATUS_CLIENT_CLOSED_REQUEST)
                .unwrap_or(StatusCode::REQUEST_TIMEOUT),
            AppError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::PreconditionFailed(_) => "precondition_failed",
            AppError::Unauthenticated(_) => "unauthenticated",
            AppError::Forbidden(_) => "forbidden",
            AppError::StorageUnavailable(_) => "storage_unavailable",
            AppError::Canceled => "canceled",
            AppError::Internal { .. } => "internal_error",
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(m) => AppError::NotFound(m),
            StorageError::Conflict(m) => AppError::Conflict(m),
            StorageError::PreconditionFailed(m) => AppError::PreconditionFailed(m),
            StorageError::Unavailable(m) => AppError::StorageUnavailable(m),
        }
    }
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        // Internal details stay in the logs.
        let message = match &self {
            AppError::Internal { verb, phase, .. } => format!("internal error during {} {}", verb, phase),
            other => other.to_string(),
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code().to_string(),
                message,
                details: None,
            },
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_covers_taxonomy() {
        assert_eq!(AppError::BadRequest("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::Unauthenticated("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(AppError::PreconditionFailed("x".into()).status(), StatusCode::PRECONDITION_FAILED);
        assert_eq!(AppError::Canceled.status().as_u16(), 499);
        assert_eq!(
            AppError::internal(Verb::Create, Phase::Main, "boom").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::StorageUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn storage_errors_map_to_client_and_transient_kinds() {
        assert!(matches!(AppError::from(StorageError::NotFound("a".into())), AppError::NotFound(_)));
        assert!(matches!(AppError::from(StorageError::Conflict("a".into())), AppError::Conflict(_)));
        assert!(matches!(
            AppError::from(StorageError::Unavailable("a".into())),
            AppError::StorageUnavailable(_)
        ));
    }
}
