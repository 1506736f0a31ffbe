//! Content generation seam.
//!
//! The actual AI providers live outside this repository; anything that can
//! turn a task into document content plugs in here.

use std::time::Duration;

use async_trait::async_trait;

use leanloom_core::tasks::GenerationTask;

/// A produced document draft.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedDocument {
    /// Markdown body.
    pub content: String,
}

#[derive(Debug, thiserror::Error)]
#[error("generation failed: {0}")]
pub struct ProviderError(pub String);

/// An external system that turns a generation task into document content.
/// Implementations may take seconds to minutes per call.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, task: &GenerationTask) -> Result<GeneratedDocument, ProviderError>;
}

/// Canned provider for demos and local runs: emits a lean-canvas skeleton
/// after a short simulated delay.
pub struct FixtureProvider {
    delay: Duration,
}

impl FixtureProvider {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for FixtureProvider {
    fn default() -> Self {
        Self::new(Duration::from_millis(50))
    }
}

#[async_trait]
impl GenerationProvider for FixtureProvider {
    async fn generate(&self, task: &GenerationTask) -> Result<GeneratedDocument, ProviderError> {
        tokio::time::sleep(self.delay).await;
        let document_type = task.document_type.as_deref().unwrap_or("lean_canvas");
        Ok(GeneratedDocument {
            content: format!(
                "# Draft: {document_type}\n\n\
                 ## Problem\n_Generated placeholder for idea {}._\n\n\
                 ## Solution\n_Generated placeholder._\n\n\
                 ## Key Metrics\n_Generated placeholder._\n",
                task.idea_id
            ),
        })
    }
}
