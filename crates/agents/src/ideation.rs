//! Ideation worker - brainstorming and suggestions.

use crate::config::{WorkerConfig, WorkerMode};
use async_trait::async_trait;
use std::sync::Arc;
use switchboard_common::{Context, Result, SwitchboardError, Worker, HISTORY_KEY};
use switchboard_llm::{complete_text, LlmClient};
use tracing::info;

const IDEATION_SYSTEM_PROMPT: &str = r#"Você é um facilitador criativo. Seu papel é:

1. Entender o objetivo por trás do pedido
2. Propor ideias variadas, das mais seguras às mais ousadas
3. Explicar em uma frase o valor de cada ideia
4. Sugerir um primeiro passo concreto

Prefira ideias práticas e específicas ao contexto do usuário.
Use listas numeradas.
"#;

/// Generates ideas and suggestions for open-ended requests.
pub struct IdeationWorker {
    name: String,
    config: WorkerConfig,
    llm: Option<Arc<dyn LlmClient>>,
}

impl IdeationWorker {
    pub fn live(llm: Arc<dyn LlmClient>) -> Self {
        Self::build(
            WorkerConfig {
                mode: WorkerMode::Live,
                ..Default::default()
            },
            Some(llm),
        )
    }

    pub fn stub() -> Self {
        Self::build(WorkerConfig::default(), None)
    }

    pub fn from_config(config: WorkerConfig, llm: Option<Arc<dyn LlmClient>>) -> Result<Self> {
        if config.mode == WorkerMode::Live && llm.is_none() {
            return Err(SwitchboardError::Config(
                "live ideation worker needs a completion client".into(),
            ));
        }
        Ok(Self::build(config, llm))
    }

    fn build(config: WorkerConfig, llm: Option<Arc<dyn LlmClient>>) -> Self {
        info!(mode = ?config.mode, "Creating ideation worker");
        Self {
            name: "ideation".into(),
            config,
            llm,
        }
    }

    pub fn mode(&self) -> WorkerMode {
        self.config.mode
    }

    fn system_prompt(&self) -> &str {
        self.config
            .system_prompt
            .as_deref()
            .unwrap_or(IDEATION_SYSTEM_PROMPT)
    }
}

#[async_trait]
impl Worker for IdeationWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: &str, context: &Context) -> Result<String> {
        info!(agent = %self.name, mode = ?self.config.mode, "Processing ideation request");

        match (self.config.mode, &self.llm) {
            (WorkerMode::Live, Some(llm)) => {
                let mut prompt = self.system_prompt().to_string();
                if let Some(history) = context.get(HISTORY_KEY).filter(|h| !h.is_empty()) {
                    prompt.push_str(&format!("\nConversa recente:\n{history}\n"));
                }
                complete_text(llm.as_ref(), &prompt, message, None).await
            }
            (WorkerMode::Live, None) => Err(SwitchboardError::delegation(
                &self.name,
                "live mode without completion client",
            )),
            (WorkerMode::Stub, _) => {
                let topic = message.trim();
                Ok(format!(
                    "Ideias para \"{topic}\":\n\
                     1. Liste o que já funciona e amplie o que der mais resultado.\n\
                     2. Converse com quem será impactado antes de decidir.\n\
                     3. Teste a ideia mais simples em pequena escala nesta semana."
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_llm::StubLlmClient;

    #[tokio::test]
    async fn test_stub_is_deterministic() {
        let worker = IdeationWorker::stub();
        let a = worker.process("festa da firma", &Context::new()).await.unwrap();
        let b = worker.process("festa da firma", &Context::new()).await.unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("Ideias para \"festa da firma\""));
    }

    #[tokio::test]
    async fn test_live_uses_completion_client() {
        let client = Arc::new(StubLlmClient::new("stub-1"));
        let worker = IdeationWorker::live(client.clone());

        let mut context = Context::new();
        context.insert(HISTORY_KEY.into(), "usuário: oi".into());
        let answer = worker.process("nome para o podcast", &context).await.unwrap();

        assert!(answer.starts_with("Você é um facilitador criativo."));
        assert!(answer.contains("nome para o podcast"));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn test_upstream_failure_propagates() {
        let worker = IdeationWorker::live(Arc::new(StubLlmClient::unavailable("stub-1")));
        let err = worker.process("x", &Context::new()).await.unwrap_err();
        assert!(err.is_upstream());
    }
}
