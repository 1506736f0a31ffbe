//! Queue consumer walking generation jobs through the status pipeline.

use std::sync::Arc;

use async_trait::async_trait;

use leanloom_core::job::JobStatus;
use leanloom_core::tasks::GenerationTask;
use leanloom_core::{CoreError, DbId};
use leanloom_pipeline::{JobStatusService, PipelineError};
use leanloom_queue::{QueueError, TaskConsumer, TaskMessage};

use crate::provider::GenerationProvider;
use crate::sink::DocumentSink;

const DEFAULT_DOCUMENT_TYPE: &str = "lean_canvas";

pub struct GenerationHandler {
    service: Arc<JobStatusService>,
    provider: Arc<dyn GenerationProvider>,
    sink: Arc<dyn DocumentSink>,
}

impl GenerationHandler {
    pub fn new(
        service: Arc<JobStatusService>,
        provider: Arc<dyn GenerationProvider>,
        sink: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            service,
            provider,
            sink,
        }
    }

    async fn run(&self, task: &GenerationTask) -> Result<(), QueueError> {
        self.advance(task.job_id, JobStatus::Started, Some("Picked up by worker"))
            .await?;
        self.advance(
            task.job_id,
            JobStatus::Generating,
            Some("Generating document content"),
        )
        .await?;
        self.service
            .report_progress(task.job_id, 25, None)
            .await
            .map_err(handler_error)?;

        let document = match self.provider.generate(task).await {
            Ok(document) => document,
            Err(error) => return self.fail_job(task.job_id, &error.to_string()).await,
        };

        self.service
            .report_progress(task.job_id, 90, Some("Formatting document"))
            .await
            .map_err(handler_error)?;

        let document_type = task.document_type.as_deref().unwrap_or(DEFAULT_DOCUMENT_TYPE);
        if let Err(error) = self
            .sink
            .store(task.idea_id, document_type, &document.content)
            .await
        {
            return self.fail_job(task.job_id, &error.to_string()).await;
        }

        self.advance(task.job_id, JobStatus::Completed, Some("Draft ready"))
            .await?;
        Ok(())
    }

    /// Apply a forward transition, tolerating rows that are already past it
    /// (redeliveries and concurrent attempts).
    async fn advance(
        &self,
        job_id: DbId,
        to: JobStatus,
        description: Option<&str>,
    ) -> Result<(), QueueError> {
        match self.service.update_status(job_id, to, description).await {
            Ok(_) => Ok(()),
            Err(PipelineError::Core(CoreError::InvalidTransition { from, .. })) => {
                tracing::info!(job_id, %from, %to, "Skipping transition, another attempt is ahead");
                Ok(())
            }
            Err(error) => Err(handler_error(error)),
        }
    }

    /// Record the failure on the job row, then reject the delivery. The
    /// message is acknowledged regardless; the row is the durable record of
    /// what went wrong.
    async fn fail_job(&self, job_id: DbId, reason: &str) -> Result<(), QueueError> {
        if let Err(error) = self
            .service
            .update_status(job_id, JobStatus::Failed, Some(reason))
            .await
        {
            tracing::error!(job_id, error = %error, "Failed to record job failure");
        }
        Err(QueueError::Handler(reason.to_string()))
    }
}

#[async_trait]
impl TaskConsumer for GenerationHandler {
    async fn handle(&self, message: TaskMessage) -> Result<(), QueueError> {
        let task: GenerationTask = message.payload_as()?;

        let Some(job) = self
            .service
            .get_job(task.job_id)
            .await
            .map_err(handler_error)?
        else {
            tracing::warn!(job_id = task.job_id, "Task references a job that does not exist");
            return Ok(());
        };

        if job.status.is_terminal() {
            tracing::info!(
                job_id = task.job_id,
                status = %job.status,
                "Skipping redelivered task for a settled job",
            );
            return Ok(());
        }

        self.run(&task).await
    }
}

fn handler_error(error: PipelineError) -> QueueError {
    QueueError::Handler(error.to_string())
}
