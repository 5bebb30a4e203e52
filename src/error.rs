//! Error taxonomy shared by every store, the gate, and the HTTP boundary.

use poem::{error::ResponseError, http::StatusCode, Body, Response};
use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlogError>;

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("duplicate {0}")]
    DuplicateKey(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("author does not resolve to an admin account")]
    InvalidAuthor,

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BlogError {
    /// Only transient storage failures may be retried by the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BlogError::StorageUnavailable(_))
    }

    pub(crate) fn unauthorized(msg: impl Into<String>) -> Self {
        BlogError::Unauthorized(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        BlogError::Validation(msg.into())
    }
}

impl From<DbErr> for BlogError {
    fn from(err: DbErr) -> Self {
        if let Some(SqlErr::UniqueConstraintViolation(detail)) = err.sql_err() {
            return BlogError::DuplicateKey(unique_key_name(&detail));
        }

        match err {
            DbErr::ConnectionAcquire(_) | DbErr::Conn(_) => {
                BlogError::StorageUnavailable(err.to_string())
            }
            DbErr::RecordNotFound(what) => BlogError::NotFound(what),
            other => BlogError::Internal(other.to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for BlogError {
    fn from(err: validator::ValidationErrors) -> Self {
        BlogError::Validation(err.to_string())
    }
}

impl From<tokio::task::JoinError> for BlogError {
    fn from(err: tokio::task::JoinError) -> Self {
        BlogError::Internal(err.to_string())
    }
}

// Backends report unique violations with the offending column buried in the
// message; surface the column name when we recognise it.
fn unique_key_name(detail: &str) -> String {
    let lower = detail.to_ascii_lowercase();
    if lower.contains("email") {
        "email".to_string()
    } else if lower.contains("title") {
        "title".to_string()
    } else {
        detail.to_string()
    }
}

impl ResponseError for BlogError {
    fn status(&self) -> StatusCode {
        match self {
            BlogError::Validation(_) | BlogError::InvalidAuthor => StatusCode::BAD_REQUEST,
            BlogError::NotFound(_) => StatusCode::NOT_FOUND,
            BlogError::DuplicateKey(_) => StatusCode::CONFLICT,
            BlogError::InvalidCredentials | BlogError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            BlogError::Forbidden(_) => StatusCode::FORBIDDEN,
            BlogError::StorageUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            BlogError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn as_response(&self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "request failed");
        }

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
        });

        Response::builder()
            .status(status)
            .content_type("application/json")
            .body(Body::from_string(body.to_string()))
    }
}
