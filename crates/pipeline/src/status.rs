//! Job status service.
//!
//! Translates requested state changes into guarded database updates and
//! notification events. Publication happens before the call returns, so a
//! subscriber that saw the call succeed has the event in its buffer.

use leanloom_core::job::{can_transition, JobStatus};
use leanloom_core::{CoreError, DbId, JobRecord};
use leanloom_db::models::job::NewJob;
use leanloom_db::repositories::JobRepo;
use leanloom_db::DbPool;
use leanloom_events::bus::EventBus;
use leanloom_events::wire::NotificationEvent;

use crate::error::PipelineError;

#[derive(Clone)]
pub struct JobStatusService {
    pool: DbPool,
    bus: EventBus,
}

impl JobStatusService {
    pub fn new(pool: DbPool, bus: EventBus) -> Self {
        Self { pool, bus }
    }

    /// Insert a pending job row.
    ///
    /// A foreign-key violation means the referenced owner or idea does not
    /// exist and is reported as [`CoreError::NotFound`] rather than a raw
    /// database error.
    pub async fn create_job(&self, input: &NewJob) -> Result<JobRecord, PipelineError> {
        let job = JobRepo::create(&self.pool, input)
            .await
            .map_err(|e| match missing_reference(&e, input) {
                Some(not_found) => PipelineError::Core(not_found),
                None => PipelineError::Database(e),
            })?;
        let record = job.to_record()?;
        tracing::info!(
            job_id = record.id,
            idea_id = record.idea_id,
            document_type = ?record.document_type,
            "Generation job created",
        );
        Ok(record)
    }

    pub async fn get_job(&self, job_id: DbId) -> Result<Option<JobRecord>, PipelineError> {
        match JobRepo::find_by_id(&self.pool, job_id).await? {
            Some(job) => Ok(Some(job.to_record()?)),
            None => Ok(None),
        }
    }

    /// Most recent job for an idea, optionally narrowed to one document
    /// type. `Ok(None)` when the idea has no jobs yet.
    pub async fn latest_for_idea(
        &self,
        idea_id: DbId,
        document_type: Option<&str>,
    ) -> Result<Option<JobRecord>, PipelineError> {
        match JobRepo::latest_for_idea(&self.pool, idea_id, document_type).await? {
            Some(job) => Ok(Some(job.to_record()?)),
            None => Ok(None),
        }
    }

    /// Apply a status transition and publish the matching event.
    ///
    /// Rejects backward movement and any change out of a terminal status.
    /// Re-applying the current status is legal and refreshes the
    /// description, which is how workers post phase messages.
    pub async fn update_status(
        &self,
        job_id: DbId,
        to: JobStatus,
        description: Option<&str>,
    ) -> Result<JobRecord, PipelineError> {
        let job = JobRepo::find_by_id(&self.pool, job_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "job",
                id: job_id,
            })?;
        let from = job.status()?;

        if !can_transition(from, to) {
            tracing::warn!(job_id, %from, %to, "Rejected status transition");
            return Err(CoreError::InvalidTransition { job_id, from, to }.into());
        }

        let updated = JobRepo::transition(&self.pool, job_id, from, to, description).await?;
        let Some(updated) = updated else {
            // Compare-and-set lost: someone moved the job between our read
            // and the update. Report the conflict against what is there now.
            let current = match JobRepo::find_by_id(&self.pool, job_id).await? {
                Some(job) => job.status()?,
                None => {
                    return Err(CoreError::NotFound {
                        entity: "job",
                        id: job_id,
                    }
                    .into())
                }
            };
            tracing::warn!(job_id, %current, %to, "Status transition lost a concurrent update");
            return Err(CoreError::InvalidTransition {
                job_id,
                from: current,
                to,
            }
            .into());
        };

        let record = updated.to_record()?;
        tracing::info!(job_id, %from, %to, "Job status updated");
        self.bus.publish(NotificationEvent::for_transition(
            job_id,
            to,
            description.map(str::to_string),
        ));
        Ok(record)
    }

    /// Record advisory progress and publish a progress event.
    ///
    /// Returns `Ok(false)` without publishing when the job is terminal or
    /// missing; a late progress write from a worker is not an error.
    pub async fn report_progress(
        &self,
        job_id: DbId,
        percent: i16,
        message: Option<&str>,
    ) -> Result<bool, PipelineError> {
        let applied = JobRepo::update_progress(&self.pool, job_id, percent, message).await?;
        if !applied {
            tracing::debug!(job_id, percent, "Progress update dropped (job terminal or missing)");
            return Ok(false);
        }
        self.bus.publish(NotificationEvent::progress(
            job_id,
            percent,
            message.map(str::to_string),
        ));
        Ok(true)
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

/// Map a foreign-key violation on insert to the entity the caller named.
fn missing_reference(error: &sqlx::Error, input: &NewJob) -> Option<CoreError> {
    let sqlx::Error::Database(db) = error else {
        return None;
    };
    if db.code().as_deref() != Some("23503") {
        return None;
    }
    match db.constraint() {
        Some(name) if name.contains("owner_id") => Some(CoreError::NotFound {
            entity: "user",
            id: input.owner_id,
        }),
        Some(name) if name.contains("idea_id") => Some(CoreError::NotFound {
            entity: "idea",
            id: input.idea_id,
        }),
        _ => None,
    }
}
