use std::sync::Arc;

use leanloom_db::DbPool;
use leanloom_pipeline::{GenerationProducer, JobStatusService};

use crate::ws::NotificationHub;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: DbPool,
    /// WebSocket notification hub (browser clients).
    pub hub: Arc<NotificationHub>,
    /// Job store facade; reads and status transitions go through here.
    pub service: Arc<JobStatusService>,
    /// Producer side of the generation pipeline (job row + queue task).
    pub producer: Arc<GenerationProducer>,
}
