//! Status callback delivery

use super::PipelineRunStatus;
use crate::errors::{AppError, Result};
use std::time::Duration;
use tracing::debug;

/// Receives every status snapshot of a run
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn send(&self, status: &PipelineRunStatus) -> Result<()>;
}

/// POSTs snapshots to the caller's callback URL
pub struct HttpStatusSink {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl HttpStatusSink {
    pub fn new(url: impl Into<String>, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            url: url.into(),
            token: token.into(),
        })
    }
}

#[async_trait::async_trait]
impl StatusSink for HttpStatusSink {
    async fn send(&self, status: &PipelineRunStatus) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(status)
            .send()
            .await
            .map_err(|e| AppError::StatusDelivery {
                message: format!("Callback to {} failed: {}", self.url, e),
            })?;

        if !response.status().is_success() {
            return Err(AppError::StatusDelivery {
                message: format!("Callback to {} returned {}", self.url, response.status().as_u16()),
            });
        }
        Ok(())
    }
}

/// Logs snapshots; used when a run has no callback
#[derive(Debug, Default)]
pub struct TracingStatusSink;

#[async_trait::async_trait]
impl StatusSink for TracingStatusSink {
    async fn send(&self, status: &PipelineRunStatus) -> Result<()> {
        debug!(
            stages = ?status.stages.iter().map(|s| s.state.as_str()).collect::<Vec<_>>(),
            finished = status.is_finished(),
            "Status update"
        );
        Ok(())
    }
}
