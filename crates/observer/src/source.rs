//! Where the observer's polls go.

use async_trait::async_trait;
use serde::Deserialize;

use leanloom_core::{DbId, JobRecord};

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure; assumed transient, polling continues.
    #[error("status fetch failed: {0}")]
    Transport(String),

    /// Non-success HTTP status other than 404.
    #[error("status fetch returned HTTP {0}")]
    Status(u16),

    #[error("status response could not be decoded: {0}")]
    Decode(String),
}

/// Read seam for job state.
///
/// `Ok(None)` is the 404 case: the job id is unknown to the server, which
/// the observer surfaces as a distinct missing state rather than an error.
#[async_trait]
pub trait JobStatusSource: Send + Sync {
    async fn fetch_job(&self, job_id: DbId) -> Result<Option<JobRecord>, FetchError>;
}

/// Polls `GET {base_url}/jobs/{id}` on the document API.
pub struct HttpJobSource {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct DataEnvelope {
    data: JobRecord,
}

impl HttpJobSource {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl JobStatusSource for HttpJobSource {
    async fn fetch_job(&self, job_id: DbId) -> Result<Option<JobRecord>, FetchError> {
        let url = format!("{}/jobs/{}", self.base_url, job_id);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let envelope: DataEnvelope = response
            .json()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))?;
        Ok(Some(envelope.data))
    }
}
