//! Producer side of the pipeline: create a job row, then enqueue its task.
//!
//! The row is written first so the task always references a job that
//! exists. When the queue is unreachable the enqueue fails fast and the
//! error surfaces to the caller; the row stays `pending` and a later retry
//! request enqueues a fresh task for a fresh row.

use std::sync::Arc;

use leanloom_core::tasks::{GenerationTask, TASK_DOCUMENT_GENERATION};
use leanloom_core::{CoreError, DbId, JobRecord};
use leanloom_db::models::job::NewJob;
use leanloom_queue::{QueueError, QueueTransport, TaskMessage};

use crate::error::PipelineError;
use crate::status::JobStatusService;

#[derive(Clone)]
pub struct GenerationProducer {
    service: Arc<JobStatusService>,
    queue: QueueTransport,
}

impl GenerationProducer {
    pub fn new(service: Arc<JobStatusService>, queue: QueueTransport) -> Self {
        Self { service, queue }
    }

    /// Open a new generation job for an idea and enqueue its task.
    pub async fn request_generation(
        &self,
        owner_id: DbId,
        idea_id: DbId,
        document_type: Option<String>,
    ) -> Result<JobRecord, PipelineError> {
        let input = NewJob {
            owner_id,
            idea_id,
            document_type,
            retry_of_job_id: None,
        };
        let record = self.service.create_job(&input).await?;
        self.enqueue(&record).await?;
        Ok(record)
    }

    /// Re-run a generation as a brand-new job linked to the original.
    ///
    /// The original row is left untouched, whatever state it is in; a job
    /// stuck in `generating` past the client timeout is retried the same
    /// way as a failed one.
    pub async fn retry(&self, job_id: DbId) -> Result<JobRecord, PipelineError> {
        let original = self
            .service
            .get_job(job_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "job",
                id: job_id,
            })?;

        let input = NewJob {
            owner_id: original.owner_id,
            idea_id: original.idea_id,
            document_type: original.document_type.clone(),
            retry_of_job_id: Some(original.id),
        };
        let record = self.service.create_job(&input).await?;
        tracing::info!(
            job_id = record.id,
            retry_of = original.id,
            "Retrying generation as a new job",
        );
        self.enqueue(&record).await?;
        Ok(record)
    }

    async fn enqueue(&self, record: &JobRecord) -> Result<(), PipelineError> {
        let task = GenerationTask {
            job_id: record.id,
            owner_id: record.owner_id,
            idea_id: record.idea_id,
            document_type: record.document_type.clone(),
        };
        let message = TaskMessage::from_payload(TASK_DOCUMENT_GENERATION, &task)
            .map_err(QueueError::Serialization)?;
        self.queue.publish(&message)?;
        tracing::info!(
            job_id = record.id,
            idea_id = record.idea_id,
            "Generation task enqueued",
        );
        Ok(())
    }
}
