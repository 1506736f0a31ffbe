//! Handlers for generation jobs: read endpoints backing the client
//! observer's polling, and the producer endpoints that start and retry
//! generations.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use leanloom_core::error::CoreError;
use leanloom_core::types::DbId;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// POST /ideas/{idea_id}/generations request body.
#[derive(Debug, Deserialize, Validate)]
pub struct GenerateRequest {
    /// User the job runs on behalf of.
    pub owner_id: DbId,
    /// Optional document type discriminator; the worker falls back to the
    /// default canvas type when absent.
    #[validate(length(min = 1, max = 64, message = "document_type must be 1-64 characters"))]
    pub document_type: Option<String>,
}

/// Query parameters for GET /ideas/{idea_id}/jobs/latest.
#[derive(Debug, Deserialize)]
pub struct LatestJobQuery {
    pub document_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Read
// ---------------------------------------------------------------------------

/// GET /jobs/{id}
///
/// Fetch one job. This is the endpoint the client observer polls; 404 is
/// how a deleted or never-created job surfaces there.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .service
        .get_job(job_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "job",
            id: job_id,
        }))?;

    Ok(Json(DataResponse { data: job }))
}

/// GET /ideas/{idea_id}/jobs/latest
///
/// Most recent job for an idea, optionally narrowed by `?document_type=`.
/// Responds 200 with `{"data": null}` when the idea has no jobs yet; the
/// absence of a job is a normal state, not an error.
pub async fn latest_job(
    State(state): State<AppState>,
    Path(idea_id): Path<DbId>,
    Query(query): Query<LatestJobQuery>,
) -> AppResult<impl IntoResponse> {
    let job = state
        .service
        .latest_for_idea(idea_id, query.document_type.as_deref())
        .await?;

    Ok(Json(DataResponse { data: job }))
}

// ---------------------------------------------------------------------------
// Produce
// ---------------------------------------------------------------------------

/// POST /ideas/{idea_id}/generations
///
/// Start a document generation for an idea. Returns 202 with the created
/// job; completion is observed via the notification bus or by polling.
pub async fn request_generation(
    State(state): State<AppState>,
    Path(idea_id): Path<DbId>,
    Json(input): Json<GenerateRequest>,
) -> AppResult<impl IntoResponse> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))?;

    let job = state
        .producer
        .request_generation(input.owner_id, idea_id, input.document_type)
        .await?;

    tracing::info!(job_id = job.id, idea_id, "Generation requested");

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}

/// POST /jobs/{id}/retry
///
/// Re-run a generation as a brand-new job linked to the original. Works for
/// failed jobs and for jobs stuck in a non-terminal status. Returns 202
/// with the superseding job.
pub async fn retry_job(
    State(state): State<AppState>,
    Path(job_id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let job = state.producer.retry(job_id).await?;

    tracing::info!(job_id, new_job_id = job.id, "Generation retried");

    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: job })))
}
