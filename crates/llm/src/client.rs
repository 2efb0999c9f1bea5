use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use switchboard_common::{ConversationTurn, Result, TurnRole};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        match turn.role {
            TurnRole::User => Self::user(turn.content.clone()),
            TurnRole::Agent => Self::assistant(turn.content.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    /// System prompt, prior turns, then the new user message.
    pub fn new(
        system_prompt: impl Into<String>,
        message: impl Into<String>,
        history: &[ConversationTurn],
    ) -> Self {
        let mut messages: Vec<ChatMessage> = history.iter().map(ChatMessage::from).collect();
        messages.push(ChatMessage::user(message));
        Self {
            system_prompt: Some(system_prompt.into()),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    /// The last user message, if any.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

/// The completion-service contract.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse>;
    fn model_name(&self) -> &str;
}

#[async_trait]
impl LlmClient for Box<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        (**self).complete(request).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

#[async_trait]
impl LlmClient for std::sync::Arc<dyn LlmClient> {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        (**self).complete(request).await
    }
    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// `complete(system_prompt, message, history?) -> text`.
pub async fn complete_text(
    client: &dyn LlmClient,
    system_prompt: &str,
    message: &str,
    history: Option<&[ConversationTurn]>,
) -> Result<String> {
    let request = LlmRequest::new(system_prompt, message, history.unwrap_or(&[]));
    Ok(client.complete(request).await?.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubLlmClient;

    #[test]
    fn test_request_places_history_before_message() {
        let history = vec![
            ConversationTurn::user("quais eventos temos?"),
            ConversationTurn::agent("Dois eventos em março."),
        ];
        let request = LlmRequest::new("Seja útil.", "e em abril?", &history);

        assert_eq!(request.system_prompt.as_deref(), Some("Seja útil."));
        assert_eq!(request.messages.len(), 3);
        assert_eq!(request.messages[1].role, Role::Assistant);
        assert_eq!(request.last_user_message(), Some("e em abril?"));
    }

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::System).unwrap(), "\"system\"");
        assert_eq!(
            serde_json::to_string(&Role::Assistant).unwrap(),
            "\"assistant\""
        );
    }

    #[tokio::test]
    async fn test_complete_text_returns_content() {
        let client = StubLlmClient::new("stub");
        let text = complete_text(&client, "Você gera ideias.", "ideias para o blog", None)
            .await
            .unwrap();
        assert!(text.contains("ideias para o blog"));
    }
}
