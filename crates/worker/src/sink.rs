//! Document persistence seam.
//!
//! Storing is keyed by idea and document type with replace semantics:
//! re-running a generation overwrites the previous draft, which is what
//! makes redelivered tasks safe to process again.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use leanloom_core::DbId;

#[derive(Debug, thiserror::Error)]
#[error("document store failed: {0}")]
pub struct SinkError(pub String);

#[async_trait]
pub trait DocumentSink: Send + Sync {
    /// Store `content` as the document for `(idea_id, document_type)`,
    /// replacing any previous version.
    async fn store(
        &self,
        idea_id: DbId,
        document_type: &str,
        content: &str,
    ) -> Result<(), SinkError>;
}

/// In-memory sink, used by tests and local runs without a document store.
#[derive(Default)]
pub struct MemorySink {
    documents: Mutex<HashMap<(DbId, String), String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, idea_id: DbId, document_type: &str) -> Option<String> {
        self.lock()
            .get(&(idea_id, document_type.to_string()))
            .cloned()
    }

    pub fn document_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(DbId, String), String>> {
        self.documents.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn store(
        &self,
        idea_id: DbId,
        document_type: &str,
        content: &str,
    ) -> Result<(), SinkError> {
        self.lock()
            .insert((idea_id, document_type.to_string()), content.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn store_replaces_the_previous_draft() {
        let sink = MemorySink::new();

        sink.store(1, "lean_canvas", "first draft").await.unwrap();
        sink.store(1, "lean_canvas", "second draft").await.unwrap();
        sink.store(1, "pitch", "pitch draft").await.unwrap();

        assert_eq!(sink.document(1, "lean_canvas").as_deref(), Some("second draft"));
        assert_eq!(sink.document_count(), 2);
    }
}
