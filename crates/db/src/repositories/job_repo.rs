//! Repository for the `generation_jobs` table.
//!
//! Status literals go through `JobStatus` from `leanloom-core`; no magic
//! numbers. Transition legality is checked by the status service, but every
//! UPDATE here carries its own guard so a concurrent writer can never
//! resurrect a terminal row.

use sqlx::PgPool;

use leanloom_core::job::JobStatus;
use leanloom_core::{DbId, StatusId};

use crate::models::job::{Job, NewJob};

/// Column list for `generation_jobs` queries.
const COLUMNS: &str = "\
    id, owner_id, idea_id, document_type, status_id, description, \
    progress_percent, retry_of_job_id, created_at, updated_at";

/// Terminal statuses: completed, failed.
const TERMINAL_STATUSES: [StatusId; 2] = [JobStatus::Completed.id(), JobStatus::Failed.id()];

/// Data access for generation jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new pending job and return the row.
    ///
    /// Invalid `owner_id`/`idea_id` references surface as a foreign-key
    /// violation; the status service classifies that into `NotFound`.
    pub async fn create(pool: &PgPool, input: &NewJob) -> Result<Job, sqlx::Error> {
        let query = format!(
            "INSERT INTO generation_jobs \
                 (owner_id, idea_id, document_type, status_id, retry_of_job_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(input.owner_id)
            .bind(input.idea_id)
            .bind(&input.document_type)
            .bind(JobStatus::Pending.id())
            .bind(input.retry_of_job_id)
            .fetch_one(pool)
            .await
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Job>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM generation_jobs WHERE id = $1");
        sqlx::query_as::<_, Job>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recently created job for an idea, optionally narrowed to one
    /// document type. Lets a client resume observing after a page reload
    /// without having remembered the job id.
    pub async fn latest_for_idea(
        pool: &PgPool,
        idea_id: DbId,
        document_type: Option<&str>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = if document_type.is_some() {
            format!(
                "SELECT {COLUMNS} FROM generation_jobs \
                 WHERE idea_id = $1 AND document_type = $2 \
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            )
        } else {
            format!(
                "SELECT {COLUMNS} FROM generation_jobs \
                 WHERE idea_id = $1 \
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            )
        };

        let mut q = sqlx::query_as::<_, Job>(&query).bind(idea_id);
        if let Some(doc_type) = document_type {
            q = q.bind(doc_type);
        }
        q.fetch_optional(pool).await
    }

    /// Move a job from an expected current status to a new one, updating the
    /// description when one is given (last-writer-wins).
    ///
    /// Compare-and-set: returns `None` when the row no longer holds `from`,
    /// which means a concurrent writer got there first (or the caller raced
    /// a terminal transition). Completion pins `progress_percent` to 100.
    pub async fn transition(
        pool: &PgPool,
        job_id: DbId,
        from: JobStatus,
        to: JobStatus,
        description: Option<&str>,
    ) -> Result<Option<Job>, sqlx::Error> {
        let query = format!(
            "UPDATE generation_jobs \
             SET status_id = $3, \
                 description = COALESCE($4, description), \
                 progress_percent = CASE WHEN $3 = $5 THEN 100 ELSE progress_percent END, \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(job_id)
            .bind(from.id())
            .bind(to.id())
            .bind(description)
            .bind(JobStatus::Completed.id())
            .fetch_optional(pool)
            .await
    }

    /// Update progress on a non-terminal job.
    ///
    /// Returns `false` (without touching the row) when the job is already
    /// terminal; progress is advisory, so late worker writes are dropped
    /// rather than rejected.
    pub async fn update_progress(
        pool: &PgPool,
        job_id: DbId,
        percent: i16,
        message: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE generation_jobs \
             SET progress_percent = $2, \
                 description = COALESCE($3, description), \
                 updated_at = NOW() \
             WHERE id = $1 AND status_id NOT IN ($4, $5)",
        )
        .bind(job_id)
        .bind(percent)
        .bind(message)
        .bind(TERMINAL_STATUSES[0])
        .bind(TERMINAL_STATUSES[1])
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
