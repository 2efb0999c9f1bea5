//! Completion-service configuration and client assembly.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use switchboard_common::{Result, SwitchboardError};
use tracing::info;

use crate::client::LlmClient;
use crate::limit::SemaphoredClient;
use crate::openai::OpenAiClient;
use crate::retry::{RetryConfig, RetryingClient};
use crate::stub::StubLlmClient;

/// `[llm]` section of the router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// "stub" (offline, deterministic) or "openai" (any compatible endpoint)
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// If not set, `OPENAI_API_KEY` is read for the "openai" provider
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Requests allowed in flight at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,

    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_provider() -> String {
    "stub".into()
}

fn default_model() -> String {
    "stub-1".into()
}

fn default_max_concurrent() -> usize {
    2
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            api_url: None,
            max_concurrent_requests: default_max_concurrent(),
            retry: RetryConfig::default(),
        }
    }
}

impl LlmConfig {
    /// The configured key when non-empty, otherwise `OPENAI_API_KEY` for the
    /// "openai" provider.
    pub fn resolve_api_key(&self) -> Option<String> {
        match self.api_key.as_deref() {
            Some(key) if !key.is_empty() => Some(key.to_string()),
            _ if self.provider == "openai" => std::env::var("OPENAI_API_KEY").ok(),
            _ => None,
        }
    }
}

/// Assemble the configured provider behind retries and a concurrency limit.
pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>> {
    let provider: Arc<dyn LlmClient> = match config.provider.as_str() {
        "stub" => Arc::new(StubLlmClient::new(config.model.clone())),
        "openai" => Arc::new(OpenAiClient::new(
            config.api_url.clone(),
            config.model.clone(),
            config.resolve_api_key(),
        )),
        other => {
            return Err(SwitchboardError::Config(format!(
                "unknown completion provider '{other}', expected \"stub\" or \"openai\""
            )));
        }
    };

    info!(
        provider = %config.provider,
        model = %config.model,
        max_concurrent = config.max_concurrent_requests,
        max_retries = config.retry.max_retries,
        "Building completion client"
    );

    let retrying: Arc<dyn LlmClient> = Arc::new(RetryingClient::new(provider, config.retry.clone()));
    Ok(Arc::new(SemaphoredClient::new(
        retrying,
        config.max_concurrent_requests,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_section_parses() {
        let config: LlmConfig = toml::from_str(
            r#"
provider = "openai"
model = "gpt-4o-mini"
api_url = "https://llm.interno.example/v1"
max_concurrent_requests = 8

[retry]
max_retries = 4
initial_delay_ms = 100
max_delay_ms = 5000
backoff_multiplier = 2.0
"#,
        )
        .unwrap();

        assert_eq!(config.provider, "openai");
        assert_eq!(config.api_url.as_deref(), Some("https://llm.interno.example/v1"));
        assert_eq!(config.max_concurrent_requests, 8);
        assert_eq!(config.retry.max_retries, 4);
    }

    #[test]
    fn test_missing_section_means_offline_stub() {
        let config: LlmConfig = toml::from_str("").unwrap();
        assert_eq!(config.provider, "stub");
        assert_eq!(config.model, "stub-1");
        assert_eq!(config.max_concurrent_requests, 2);
        assert!(config.resolve_api_key().is_none());
    }

    #[tokio::test]
    async fn test_stub_provider_answers_through_the_wrappers() {
        let client = build_llm_client(&LlmConfig::default()).unwrap();
        let answer = crate::complete_text(client.as_ref(), "Seja breve.", "olá", None)
            .await
            .unwrap();
        assert_eq!(answer, "Seja breve.\nResposta para: \"olá\"");
        assert_eq!(client.model_name(), "stub-1");
    }

    #[test]
    fn test_unknown_provider_is_a_config_error() {
        let config = LlmConfig {
            provider: "local-gguf".into(),
            ..Default::default()
        };
        let err = build_llm_client(&config).err().unwrap();
        assert!(matches!(err, SwitchboardError::Config(ref m) if m.contains("local-gguf")));
    }

    #[test]
    fn test_configured_key_is_used_before_environment() {
        let config = LlmConfig {
            provider: "openai".into(),
            api_key: Some("sk-config".into()),
            ..Default::default()
        };
        assert_eq!(config.resolve_api_key().as_deref(), Some("sk-config"));

        let blank = LlmConfig {
            provider: "stub".into(),
            api_key: Some(String::new()),
            ..Default::default()
        };
        assert!(blank.resolve_api_key().is_none());
    }
}
