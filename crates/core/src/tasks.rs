//! Task queue payloads shared by the producer and the worker harness.

use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// The single durable queue carrying document-generation requests.
pub const DOCUMENT_GENERATION_QUEUE: &str = "document_generation_queue";

/// Task type tag for document-generation task messages.
pub const TASK_DOCUMENT_GENERATION: &str = "document_generation";

/// Payload of a `document_generation` task message.
///
/// Travels as the `payload` object of the queue message body. Unknown extra
/// fields are ignored so older workers keep consuming newer payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub job_id: DbId,
    pub owner_id: DbId,
    pub idea_id: DbId,
    #[serde(default)]
    pub document_type: Option<String>,
}
