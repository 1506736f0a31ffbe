pub mod health;
pub mod jobs;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the application route tree (no middleware).
///
/// ```text
/// GET  /health                              service + db health
/// GET  /jobs/{id}                           job by id
/// POST /jobs/{id}/retry                     retry as a new job
/// GET  /ideas/{idea_id}/jobs/latest         newest job for an idea
/// POST /ideas/{idea_id}/generations         start a generation
/// WS   {notify_ws_path}                     notification bus endpoint
/// ```
///
/// The notification endpoint path comes from configuration so deployments
/// can move it without code changes.
pub fn app_routes(notify_ws_path: &str) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .route(notify_ws_path, get(ws::notification_handler))
}
