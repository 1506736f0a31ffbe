use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use leanloom_core::CoreError;
use leanloom_pipeline::PipelineError;
use leanloom_queue::QueueError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] and [`PipelineError`] for domain errors and adds
/// HTTP-specific variants. Implements [`IntoResponse`] to produce consistent
/// `{"error": ..., "code": ...}` JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `leanloom_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An error from the generation pipeline (job store, queue).
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core(core),
            AppError::Pipeline(PipelineError::Core(core)) => classify_core(core),
            AppError::Pipeline(PipelineError::Database(err)) => classify_sqlx(err),
            AppError::Pipeline(PipelineError::Queue(err)) => classify_queue(err),
            AppError::Database(err) => classify_sqlx(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                internal()
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Map a domain error onto an HTTP status, error code, and message.
///
/// - `NotFound` maps to 404.
/// - `InvalidTransition` maps to 409 (the job moved on; nothing to retry).
/// - `Validation` maps to 400.
/// - `Internal` maps to 500 with a sanitized message.
fn classify_core(core: &CoreError) -> (StatusCode, &'static str, String) {
    match core {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::InvalidTransition { job_id, from, to } => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {job_id} cannot move from {from} to {to}"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            internal()
        }
    }
}

/// Classify a queue error into an HTTP status, error code, and message.
///
/// - `NotConnected` maps to 503 (the outage is retryable).
/// - Everything else maps to 500 with a sanitized message.
fn classify_queue(err: &QueueError) -> (StatusCode, &'static str, String) {
    match err {
        QueueError::NotConnected => (
            StatusCode::SERVICE_UNAVAILABLE,
            "QUEUE_UNAVAILABLE",
            "Generation queue is unavailable, try again shortly".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Queue error");
            internal()
        }
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Database error");
            internal()
        }
    }
}

fn internal() -> (StatusCode, &'static str, String) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}
