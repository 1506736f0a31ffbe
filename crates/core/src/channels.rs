//! Notification channel naming.
//!
//! Publisher (`pipeline`) and subscribers (`observer`, WebSocket clients)
//! derive the channel for a job independently from its id; there is no
//! channel registry. The derivation must stay in one place so the two sides
//! can never drift.

use crate::types::DbId;

/// Prefix for per-job notification channels.
pub const JOB_CHANNEL_PREFIX: &str = "job:";

/// Channel carrying every notification event for one job.
pub fn job_channel(job_id: DbId) -> String {
    format!("{JOB_CHANNEL_PREFIX}{job_id}")
}
