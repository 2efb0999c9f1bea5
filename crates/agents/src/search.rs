//! Search worker - retrieval over stored records.

use crate::config::{WorkerConfig, WorkerMode};
use async_trait::async_trait;
use std::sync::Arc;
use switchboard_common::{Context, Result, SwitchboardError, Worker, HISTORY_KEY};
use switchboard_llm::{complete_text, LlmClient};
use switchboard_memory::{RankedRecord, RecordKind, Retriever, SearchFilters};
use tracing::{debug, info, warn};

const SEARCH_SYSTEM_PROMPT: &str = r#"Você é um assistente de busca. Seu papel é:

1. Responder usando apenas os registros encontrados abaixo
2. Citar o título de cada registro utilizado
3. Dizer claramente quando os registros não respondem à pergunta

Seja objetivo. Não invente informações.
"#;

/// Longest snippet of record content shown per result.
const SNIPPET_CHARS: usize = 160;

/// Finds records relevant to the request and summarises them.
pub struct SearchWorker {
    name: String,
    config: WorkerConfig,
    retriever: Option<Arc<dyn Retriever>>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl SearchWorker {
    /// Searches `retriever` and asks `llm` to answer from the results.
    pub fn live(retriever: Arc<dyn Retriever>, llm: Arc<dyn LlmClient>) -> Self {
        Self::build(
            WorkerConfig {
                mode: WorkerMode::Live,
                ..Default::default()
            },
            Some(retriever),
            Some(llm),
        )
    }

    /// Canned answers, no collaborators.
    pub fn stub() -> Self {
        Self::build(WorkerConfig::default(), None, None)
    }

    /// Build according to `config.mode`. Live mode needs both collaborators.
    pub fn from_config(
        config: WorkerConfig,
        retriever: Option<Arc<dyn Retriever>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Result<Self> {
        if config.mode == WorkerMode::Live && (retriever.is_none() || llm.is_none()) {
            return Err(SwitchboardError::Config(
                "live search worker needs a retriever and a completion client".into(),
            ));
        }
        Ok(Self::build(config, retriever, llm))
    }

    fn build(
        config: WorkerConfig,
        retriever: Option<Arc<dyn Retriever>>,
        llm: Option<Arc<dyn LlmClient>>,
    ) -> Self {
        info!(mode = ?config.mode, "Creating search worker");
        Self {
            name: "search".into(),
            config,
            retriever,
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
            .unwrap_or(SEARCH_SYSTEM_PROMPT)
    }

    /// Filters read from the request context: `kind`, `tags` (comma
    /// separated), `since` (Unix millis) and `limit`.
    fn filters(&self, context: &Context) -> SearchFilters {
        SearchFilters {
            kind: context.get("kind").and_then(|k| RecordKind::parse(k)),
            tags: context
                .get("tags")
                .map(|tags| {
                    tags.split(',')
                        .map(str::trim)
                        .filter(|t| !t.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            since: context.get("since").and_then(|s| s.parse().ok()),
            limit: Some(
                context
                    .get("limit")
                    .and_then(|l| l.parse().ok())
                    .unwrap_or(self.config.max_results),
            ),
        }
    }

    async fn search_live(
        &self,
        retriever: &dyn Retriever,
        llm: &dyn LlmClient,
        message: &str,
        context: &Context,
    ) -> Result<String> {
        let hits = retriever.search(message, &self.filters(context)).await?;
        debug!(agent = %self.name, hits = hits.len(), "Search completed");

        if hits.is_empty() {
            return Ok(format!(
                "Não encontrei registros relacionados a \"{}\".",
                message.trim()
            ));
        }

        let listing = render_hits(&hits);
        let mut prompt = format!("{}\nRegistros encontrados:\n{listing}", self.system_prompt());
        if let Some(history) = context.get(HISTORY_KEY).filter(|h| !h.is_empty()) {
            prompt.push_str(&format!("\nConversa recente:\n{history}\n"));
        }

        match complete_text(llm, &prompt, message, None).await {
            Ok(answer) => Ok(format!("{}\n\nFontes:\n{}", answer.trim(), sources(&hits))),
            Err(e) if e.is_upstream() => {
                warn!(agent = %self.name, error = %e, "Completion unavailable, returning raw results");
                Ok(format!("Registros encontrados:\n{listing}"))
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl Worker for SearchWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: &str, context: &Context) -> Result<String> {
        info!(agent = %self.name, mode = ?self.config.mode, "Processing search request");

        match (self.config.mode, &self.retriever, &self.llm) {
            (WorkerMode::Live, Some(retriever), Some(llm)) => {
                self.search_live(retriever.as_ref(), llm.as_ref(), message, context)
                    .await
            }
            (WorkerMode::Live, _, _) => Err(SwitchboardError::delegation(
                &self.name,
                "live mode without retriever or completion client",
            )),
            (WorkerMode::Stub, _, _) => Ok(format!(
                "Busca (modo offline): nenhum índice conectado para \"{}\". \
                 Refine os termos ou importe documentos para pesquisar.",
                message.trim()
            )),
        }
    }
}

fn render_hits(hits: &[RankedRecord]) -> String {
    hits.iter()
        .enumerate()
        .map(|(i, hit)| {
            let content = hit.record.content.trim();
            let snippet: String = content.chars().take(SNIPPET_CHARS).collect();
            let ellipsis = if content.chars().count() > SNIPPET_CHARS {
                "..."
            } else {
                ""
            };
            format!("{}. {}: {snippet}{ellipsis}", i + 1, hit.record.title)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn sources(hits: &[RankedRecord]) -> String {
    hits.iter()
        .map(|hit| format!("- {}", hit.record.title))
        .collect::<Vec<_>>()
        .join("\n")
}
