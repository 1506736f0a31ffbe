//! Canonical job status taxonomy, transition rules, and timeout math.
//!
//! Source systems emit case-variant status spellings ("Done", "done",
//! "Completed", "Error"). Those are folded into the canonical enum below at
//! every ingestion boundary (queue payloads, HTTP responses, bus events);
//! nothing past a boundary compares raw status strings.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::types::{DbId, StatusId, Timestamp};

// ---------------------------------------------------------------------------
// Status taxonomy
// ---------------------------------------------------------------------------

/// Lifecycle states of a generation job.
///
/// Ids are stable and match the `job_statuses` seed table; they are also
/// ordered by pipeline progress, which the transition check relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Started,
    Generating,
    Completed,
    Failed,
}

impl JobStatus {
    /// Database id for the `generation_jobs.status_id` column.
    pub const fn id(self) -> StatusId {
        match self {
            JobStatus::Pending => 1,
            JobStatus::Started => 2,
            JobStatus::Generating => 3,
            JobStatus::Completed => 4,
            JobStatus::Failed => 5,
        }
    }

    pub fn from_id(id: StatusId) -> Option<Self> {
        match id {
            1 => Some(JobStatus::Pending),
            2 => Some(JobStatus::Started),
            3 => Some(JobStatus::Generating),
            4 => Some(JobStatus::Completed),
            5 => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Canonical lowercase spelling used on every wire surface.
    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Started => "started",
            JobStatus::Generating => "generating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Folds a raw status string into the canonical set.
    ///
    /// Case-insensitive; accepts the synonym spellings "done" (-> `Completed`)
    /// and "error" (-> `Failed`). Returns `None` for anything outside the
    /// taxonomy so callers can reject unknown statuses at the boundary.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let eq = |canon: &str| raw.eq_ignore_ascii_case(canon);
        if eq("pending") {
            Some(JobStatus::Pending)
        } else if eq("started") {
            Some(JobStatus::Started)
        } else if eq("generating") {
            Some(JobStatus::Generating)
        } else if eq("completed") || eq("done") {
            Some(JobStatus::Completed)
        } else if eq("failed") || eq("error") {
            Some(JobStatus::Failed)
        } else {
            None
        }
    }

    /// Terminal jobs are immutable; no transition leaves these states.
    pub const fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Position along the pipeline; both terminal states share the top rank.
    /// Used wherever two independently observed statuses must be reconciled
    /// (the more advanced one wins).
    pub const fn rank(self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Started => 1,
            JobStatus::Generating => 2,
            JobStatus::Completed | JobStatus::Failed => 3,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for JobStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        JobStatus::parse(&raw)
            .ok_or_else(|| D::Error::custom(format!("unknown job status: {raw}")))
    }
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Whether a status write `from -> to` is legal.
///
/// Rules: nothing leaves a terminal state; non-terminal jobs may move
/// forward along `Pending -> Started -> Generating -> {Completed|Failed}`
/// (skipping steps is fine, workers are not required to report every one),
/// may refresh their current status (the description-update path), and may
/// never move backward.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    !from.is_terminal() && to.rank() >= from.rank()
}

// ---------------------------------------------------------------------------
// Soft timeout
// ---------------------------------------------------------------------------

/// Whether a job has been running long enough to surface the soft-timeout
/// signal.
///
/// True only while the job is still non-terminal and strictly more than
/// `threshold` has elapsed since `created_at`. This is a client-side
/// heuristic: the job itself is left untouched and may still complete late.
pub fn is_timed_out(
    status: JobStatus,
    created_at: Timestamp,
    now: Timestamp,
    threshold: chrono::Duration,
) -> bool {
    !status.is_terminal() && now - created_at > threshold
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

/// Job as served by `GET /jobs/{id}` and consumed by the client observer.
///
/// `status` travels as the canonical lowercase string; deserialization folds
/// synonym spellings via [`JobStatus::parse`]. Unknown extra fields are
/// ignored for forward compatibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: DbId,
    pub owner_id: DbId,
    pub idea_id: DbId,
    pub document_type: Option<String>,
    pub status: JobStatus,
    pub description: Option<String>,
    pub progress: i16,
    pub retry_of_job_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}
