//! Queue message body: JSON `{ "type": string, "payload": object }`.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// One task message as placed on (and read off) the queue.
///
/// The body round-trips through JSON without loss; unknown extra top-level
/// fields are tolerated on read so older consumers keep working.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMessage {
    #[serde(rename = "type")]
    pub task_type: String,
    pub payload: serde_json::Value,
}

impl TaskMessage {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
        }
    }

    /// Build a message from a typed payload.
    pub fn from_payload<T: Serialize>(
        task_type: impl Into<String>,
        payload: &T,
    ) -> Result<Self, serde_json::Error> {
        Ok(Self {
            task_type: task_type.into(),
            payload: serde_json::to_value(payload)?,
        })
    }

    /// Decode the payload into a typed struct.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }
}
