//! Row types for the `generation_jobs` table.

use leanloom_core::job::{JobRecord, JobStatus};
use leanloom_core::{CoreError, DbId, StatusId, Timestamp};

/// One generation job row.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Job {
    pub id: DbId,
    pub owner_id: DbId,
    pub idea_id: DbId,
    pub document_type: Option<String>,
    pub status_id: StatusId,
    pub description: Option<String>,
    pub progress_percent: i16,
    pub retry_of_job_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Job {
    /// Canonical status for this row.
    ///
    /// `status_id` is constrained by the `job_statuses` seed table, so an
    /// unknown id means schema drift and surfaces as an internal error
    /// rather than a silent default.
    pub fn status(&self) -> Result<JobStatus, CoreError> {
        JobStatus::from_id(self.status_id).ok_or_else(|| {
            CoreError::Internal(format!(
                "job {} has unknown status id {}",
                self.id, self.status_id
            ))
        })
    }

    /// Wire representation served over HTTP and consumed by the observer.
    pub fn to_record(&self) -> Result<JobRecord, CoreError> {
        Ok(JobRecord {
            id: self.id,
            owner_id: self.owner_id,
            idea_id: self.idea_id,
            document_type: self.document_type.clone(),
            status: self.status()?,
            description: self.description.clone(),
            progress: self.progress_percent,
            retry_of_job_id: self.retry_of_job_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Insert payload for a new job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub owner_id: DbId,
    pub idea_id: DbId,
    pub document_type: Option<String>,
    /// Set when this job supersedes a timed-out or failed one.
    pub retry_of_job_id: Option<DbId>,
}
