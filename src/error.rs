use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found")]
    NotFound,

    #[error("An entry with the same course, date and hour already exists")]
    Duplicate,

    #[error("The target course, date and hour is already taken by another entry")]
    DuplicateTarget,

    #[error("Entry is locked")]
    Locked,

    #[error("Missing {0}")]
    MissingArgument(&'static str),

    #[error("A course with this id already exists")]
    Exists,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Backend failure: {0}")]
    TransientBackendFailure(String),
}

impl AppError {
    /// Stable machine-readable reason reported to the UI as `{ok:false, reason}`.
    pub fn reason(&self) -> String {
        match self {
            AppError::NotFound => "not found".to_string(),
            AppError::Duplicate => "duplicate".to_string(),
            AppError::DuplicateTarget => "duplicate_target".to_string(),
            AppError::Locked => "locked".to_string(),
            AppError::MissingArgument(what) => format!("missing {}", what),
            AppError::Exists => "exists".to_string(),
            AppError::Conflict(_) => "conflict".to_string(),
            AppError::BackendUnavailable(_) => "backend unavailable".to_string(),
            AppError::Config(_) => "configuration".to_string(),
            AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Http(_)
            | AppError::Serialization(_)
            | AppError::TransientBackendFailure(_) => "backend failure".to_string(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Duplicate
            | AppError::DuplicateTarget
            | AppError::Exists
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Locked => StatusCode::LOCKED,
            AppError::MissingArgument(_) => StatusCode::BAD_REQUEST,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Http(_) | AppError::TransientBackendFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Migrate(_)
            | AppError::Serialization(_)
            | AppError::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub reason: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("request failed: {}", self);
        }

        let body = Json(ErrorResponse {
            ok: false,
            reason: self.reason(),
            message: self.to_string(),
        });

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasons_are_stable() {
        assert_eq!(AppError::Duplicate.reason(), "duplicate");
        assert_eq!(AppError::DuplicateTarget.reason(), "duplicate_target");
        assert_eq!(AppError::Locked.reason(), "locked");
        assert_eq!(AppError::NotFound.reason(), "not found");
        assert_eq!(AppError::MissingArgument("id").reason(), "missing id");
        assert_eq!(
            AppError::TransientBackendFailure("index".to_string()).reason(),
            "backend failure"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::Locked.into_response().status(), StatusCode::LOCKED);
        assert_eq!(
            AppError::BackendUnavailable("no project".to_string()).into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(AppError::Duplicate.into_response().status(), StatusCode::CONFLICT);
    }
}
