//! Wire formats for the notification bus.
//!
//! Events flow server -> client as JSON text frames:
//! `{"type": "status", "channel": "job:7", "timestamp": "...",
//!   "data": {"message": "...", "progress": 40}}`.
//! Control frames flow client -> server on the same connection:
//! `{"type": "subscribe", "channel": "job:7"}`.

use serde::{Deserialize, Serialize};

use leanloom_core::channels::job_channel;
use leanloom_core::job::JobStatus;
use leanloom_core::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Events (server -> client)
// ---------------------------------------------------------------------------

/// Closed set of event kinds; the observer matches this exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Status,
    Progress,
    Log,
    Done,
    Error,
}

/// Variable payload of an event; both fields optional per kind.
///
/// Unknown extra fields are ignored on parse so clients keep working when
/// the server grows the payload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<i16>,
}

/// One ephemeral notification event.
///
/// Not persisted anywhere: subscribers that are offline when it fires never
/// see it, and recover the transition from the job store by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub channel: String,
    pub timestamp: Timestamp,
    #[serde(default)]
    pub data: EventData,
}

impl NotificationEvent {
    fn new(kind: EventKind, job_id: DbId, data: EventData) -> Self {
        Self {
            kind,
            channel: job_channel(job_id),
            timestamp: chrono::Utc::now(),
            data,
        }
    }

    /// Event announcing a status change, mapped from the new status:
    /// non-terminal -> `status`, `Completed` -> `done`, `Failed` -> `error`.
    pub fn for_transition(job_id: DbId, status: JobStatus, message: Option<String>) -> Self {
        let kind = match status {
            JobStatus::Pending | JobStatus::Started | JobStatus::Generating => EventKind::Status,
            JobStatus::Completed => EventKind::Done,
            JobStatus::Failed => EventKind::Error,
        };
        Self::new(
            kind,
            job_id,
            EventData {
                message,
                progress: None,
            },
        )
    }

    /// Mid-generation progress update.
    pub fn progress(job_id: DbId, percent: i16, message: Option<String>) -> Self {
        Self::new(
            EventKind::Progress,
            job_id,
            EventData {
                message,
                progress: Some(percent),
            },
        )
    }

    /// Informational line for job log surfaces.
    pub fn log(job_id: DbId, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Log,
            job_id,
            EventData {
                message: Some(message.into()),
                progress: None,
            },
        )
    }
}

/// Parse an incoming event frame.
pub fn parse_event(text: &str) -> Result<NotificationEvent, serde_json::Error> {
    serde_json::from_str(text)
}

// ---------------------------------------------------------------------------
// Control frames (client -> server)
// ---------------------------------------------------------------------------

/// Subscription control messages, sent over the same connection events
/// arrive on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Subscribe { channel: String },
    Unsubscribe { channel: String },
}

/// Parse an incoming control frame.
pub fn parse_control(text: &str) -> Result<ControlFrame, serde_json::Error> {
    serde_json::from_str(text)
}
