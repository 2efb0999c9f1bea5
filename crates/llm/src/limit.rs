//! Cap on concurrent completion requests.

use async_trait::async_trait;
use std::sync::Arc;
use switchboard_common::{Result, SwitchboardError};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

/// Lets at most `max_concurrent` requests reach the inner client; the rest
/// wait for a permit.
pub struct SemaphoredClient {
    inner: Arc<dyn LlmClient>,
    permits: Arc<Semaphore>,
}

impl SemaphoredClient {
    pub fn new(inner: Arc<dyn LlmClient>, max_concurrent: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }
}

#[async_trait]
impl LlmClient for SemaphoredClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        if self.permits.available_permits() == 0 {
            debug!(model = %self.inner.model_name(), "Waiting for a completion slot");
        }
        let _permit = self.permits.acquire().await.map_err(|e| {
            SwitchboardError::UpstreamUnavailable(format!("completion limiter closed: {e}"))
        })?;
        self.inner.complete(request).await
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
