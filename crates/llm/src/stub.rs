//! Deterministic offline completion client.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use switchboard_common::{Result, SwitchboardError};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, TokenUsage};

/// Answers every request with canned text derived from its inputs.
///
/// Identical requests always produce identical output, which keeps the
/// response cache meaningful in tests and offline deployments.
pub struct StubLlmClient {
    model: String,
    unavailable: AtomicBool,
    calls: AtomicU64,
}

impl StubLlmClient {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            unavailable: AtomicBool::new(false),
            calls: AtomicU64::new(0),
        }
    }

    /// A client that fails every call with `UpstreamUnavailable`.
    pub fn unavailable(model: impl Into<String>) -> Self {
        let client = Self::new(model);
        client.set_unavailable(true);
        client
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `complete` calls received, failed ones included.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn render(request: &LlmRequest) -> String {
        let role = request
            .system_prompt
            .as_deref()
            .and_then(|s| s.lines().find(|l| !l.trim().is_empty()))
            .map(str::trim)
            .unwrap_or("Assistente");
        let message = request.last_user_message().unwrap_or_default();
        format!("{role}\nResposta para: \"{}\"", message.trim())
    }
}

#[async_trait]
impl LlmClient for StubLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SwitchboardError::UpstreamUnavailable(format!(
                "stub model {} is offline",
                self.model
            )));
        }

        let content = Self::render(&request);
        debug!(model = %self.model, chars = content.len(), "Stub completion");

        let prompt_chars: usize = request.messages.iter().map(|m| m.content.len()).sum();
        Ok(LlmResponse {
            usage: Some(TokenUsage {
                prompt_tokens: (prompt_chars / 4) as u32,
                completion_tokens: (content.len() / 4) as u32,
            }),
            content,
            model: self.model.clone(),
            finish_reason: Some("stop".into()),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
