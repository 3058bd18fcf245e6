use crate::policy::Telemetry;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SummarySlot {
    Callback,
    Scheduler,
}

#[derive(Debug, thiserror::Error)]
pub enum SummarySourceError {
    #[error("summary source not configured for slot")]
    NotConfigured,
    #[error("upstream request failed: {0}")]
    Request(String),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SummarySource: Send + Sync {
    async fn fetch(&self, slot: SummarySlot) -> Result<Telemetry, SummarySourceError>;
}

/// Production source: the callback summary comes from this crate's own
/// consumer service (`GET /v1/telemetry-summary`, component F); the
/// scheduler summary comes from an external scheduler process reachable
/// the same way. Both are plain `reqwest` GETs under a timeout.
pub struct HttpSummarySource {
    client: reqwest::Client,
    callback_url: Option<String>,
    scheduler_url: Option<String>,
    timeout: Duration,
}

impl HttpSummarySource {
    pub fn new(callback_url: Option<String>, scheduler_url: Option<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
            scheduler_url,
            timeout,
        }
    }
}

#[async_trait]
impl SummarySource for HttpSummarySource {
    async fn fetch(&self, slot: SummarySlot) -> Result<Telemetry, SummarySourceError> {
        let url = match slot {
            SummarySlot::Callback => self.callback_url.as_deref(),
            SummarySlot::Scheduler => self.scheduler_url.as_deref(),
        }
        .ok_or(SummarySourceError::NotConfigured)?;

        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| SummarySourceError::Timeout(self.timeout))?
            .map_err(|e| SummarySourceError::Request(e.to_string()))?;

        response
            .json::<Telemetry>()
            .await
            .map_err(|e| SummarySourceError::Request(e.to_string()))
    }
}
