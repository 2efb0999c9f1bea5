//! Client for OpenAI-compatible chat-completion endpoints.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use switchboard_common::{Result, SwitchboardError};
use tracing::debug;

use crate::client::{LlmClient, LlmRequest, LlmResponse, Role, TokenUsage};

const DEFAULT_BASE_URL: &str = "http://localhost:11434";
const COMPLETIONS_PATH: &str = "/v1/chat/completions";

/// Request body, borrowing everything from the `LlmRequest`.
#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: Vec<BodyMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct BodyMessage<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionReply {
    model: String,
    #[serde(default)]
    choices: Vec<ReplyChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ReplyChoice {
    message: ReplyMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: String,
}

impl CompletionReply {
    fn into_response(self) -> Result<LlmResponse> {
        let choice = self.choices.into_iter().next().ok_or_else(|| {
            SwitchboardError::UpstreamUnavailable("completion reply had no choices".into())
        })?;
        Ok(LlmResponse {
            content: choice.message.content,
            model: self.model,
            usage: self.usage,
            finish_reason: choice.finish_reason,
        })
    }
}

/// Map a non-success HTTP status to an error. Only 5xx, 408 and 429 count as
/// the service being unavailable.
fn status_error(status: StatusCode, body: &str) -> SwitchboardError {
    let detail = format!("completion API error {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SwitchboardError::Config(detail),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            SwitchboardError::UpstreamUnavailable(detail)
        }
        s if s.is_client_error() => SwitchboardError::Validation(detail),
        _ => SwitchboardError::UpstreamUnavailable(detail),
    }
}

/// Client for any OpenAI-compatible `/v1/chat/completions` endpoint.
pub struct OpenAiClient {
    endpoint: String,
    model: String,
    api_key: Option<String>,
    http: reqwest::Client,
}

impl OpenAiClient {
    pub fn new(base_url: Option<String>, model: String, api_key: Option<String>) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            endpoint: format!("{}{COMPLETIONS_PATH}", base.trim_end_matches('/')),
            model,
            api_key,
            http: reqwest::Client::new(),
        }
    }

    fn body<'a>(&'a self, request: &'a LlmRequest) -> CompletionBody<'a> {
        let system = request.system_prompt.as_deref().map(|content| BodyMessage {
            role: Role::System,
            content,
        });
        let turns = request.messages.iter().map(|m| BodyMessage {
            role: m.role,
            content: &m.content,
        });

        CompletionBody {
            model: &self.model,
            messages: system.into_iter().chain(turns).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let mut call = self.http.post(&self.endpoint).json(&self.body(&request));
        if let Some(key) = self.api_key.as_deref() {
            call = call.bearer_auth(key);
        }

        let response = call.send().await.map_err(|e| {
            SwitchboardError::UpstreamUnavailable(format!("completion request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, endpoint = %self.endpoint, "Completion API refused request");
            return Err(status_error(status, &body));
        }

        let reply: CompletionReply = response.json().await.map_err(|e| {
            SwitchboardError::Serialization(format!("failed to parse completion reply: {e}"))
        })?;
        reply.into_response()
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_common::ConversationTurn;

    #[test]
    fn test_body_puts_system_prompt_first() {
        let client = OpenAiClient::new(None, "gpt-4o-mini".to_string(), Some("sk-test".into()));
        let history = vec![ConversationTurn::agent("Olá!")];
        let request = LlmRequest::new("Responda em português.", "ideias de pauta", &history);

        let json = serde_json::to_value(client.body(&request)).unwrap();
        let messages = json["messages"].as_array().unwrap();

        assert_eq!(json["model"], "gpt-4o-mini");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[2]["content"], "ideias de pauta");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_endpoint_joins_base_url_without_double_slash() {
        let client = OpenAiClient::new(Some("http://llm.local:8000/".into()), "m".into(), None);
        assert_eq!(client.endpoint, "http://llm.local:8000/v1/chat/completions");
    }

    #[test]
    fn test_reply_takes_first_choice() {
        let reply: CompletionReply = serde_json::from_str(
            r#"{
                "model": "gpt-4o-mini",
                "choices": [{"message": {"role": "assistant", "content": "Três ideias"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 12, "completion_tokens": 3}
            }"#,
        )
        .unwrap();

        let response = reply.into_response().unwrap();
        assert_eq!(response.content, "Três ideias");
        assert_eq!(response.finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.usage.unwrap().completion_tokens, 3);

        let empty: CompletionReply = serde_json::from_str(r#"{"model": "m"}"#).unwrap();
        assert!(empty.into_response().unwrap_err().is_upstream());
    }

    #[test]
    fn test_only_server_side_statuses_are_upstream_failures() {
        for status in [
            StatusCode::INTERNAL_SERVER_ERROR,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::REQUEST_TIMEOUT,
        ] {
            assert!(status_error(status, "").is_upstream(), "{status}");
        }

        assert!(matches!(
            status_error(StatusCode::BAD_REQUEST, "max_tokens too large"),
            SwitchboardError::Validation(ref m) if m.contains("max_tokens")
        ));
        assert!(matches!(
            status_error(StatusCode::UNAUTHORIZED, ""),
            SwitchboardError::Config(_)
        ));
        assert!(!status_error(StatusCode::NOT_FOUND, "").is_upstream());
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_upstream_error() {
        let client = OpenAiClient::new(Some("http://127.0.0.1:9".into()), "m".into(), None);
        let err = client
            .complete(LlmRequest::new("s", "m", &[]))
            .await
            .unwrap_err();
        assert!(err.is_upstream());
    }
}
