//! Session-wide degraded mode for the completion service.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use switchboard_common::{Result, SwitchboardError};
use tracing::warn;

use crate::client::{LlmClient, LlmRequest, LlmResponse};

/// Latches into degraded mode on the first `UpstreamUnavailable` failure.
///
/// Once latched every call fails fast without touching the inner client,
/// so callers switch to their template responses instead of retrying a
/// service that is known to be down. `reset` re-arms the client.
pub struct DegradingClient {
    inner: Arc<dyn LlmClient>,
    degraded: AtomicBool,
}

impl DegradingClient {
    pub fn new(inner: Arc<dyn LlmClient>) -> Self {
        Self {
            inner,
            degraded: AtomicBool::new(false),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.degraded.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl LlmClient for DegradingClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        if self.is_degraded() {
            return Err(SwitchboardError::UpstreamUnavailable(
                "completion service marked unavailable for this session".into(),
            ));
        }

        match self.inner.complete(request).await {
            Err(e) if e.is_upstream() => {
                if !self.degraded.swap(true, Ordering::SeqCst) {
                    warn!(
                        model = %self.inner.model_name(),
                        error = %e,
                        "Completion service unavailable, entering degraded mode"
                    );
                }
                Err(e)
            }
            other => other,
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
