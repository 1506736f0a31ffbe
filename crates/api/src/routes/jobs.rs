//! Route definitions for generation jobs.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Job and generation routes, mounted at the root.
///
/// ```text
/// GET    /jobs/{id}                      -> get_job
/// POST   /jobs/{id}/retry                -> retry_job
/// GET    /ideas/{idea_id}/jobs/latest    -> latest_job
/// POST   /ideas/{idea_id}/generations    -> request_generation
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/jobs/{id}", get(jobs::get_job))
        .route("/jobs/{id}/retry", post(jobs::retry_job))
        .route("/ideas/{idea_id}/jobs/latest", get(jobs::latest_job))
        .route("/ideas/{idea_id}/generations", post(jobs::request_generation))
}
