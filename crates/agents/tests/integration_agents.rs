//! Integration tests for the workers.
//!
//! Live-mode workers run against the in-process keyword retriever and the
//! stub completion client, so nothing here needs the network.

use std::sync::Arc;
use switchboard_agents::{IdeationWorker, SearchWorker, WorkerConfig, WorkerMode};
use switchboard_common::{Context, Worker};
use switchboard_llm::{LlmClient, StubLlmClient};
use switchboard_memory::{KeywordRetriever, Record, RecordStore, RetrievalConfig, Retriever};

async fn seeded_retriever() -> Arc<dyn Retriever> {
    let config = RetrievalConfig::default();
    let store = Arc::new(RecordStore::new(&config));
    store
        .extend(vec![
            Record::document("Relatório de vendas", "Vendas subiram 8% no trimestre")
                .with_tags(vec!["financeiro".into()]),
            Record::document("Plano de marketing", "Campanha de vendas para o verão"),
            Record::note("Fornecedor", "Trocar fornecedor de embalagens"),
        ])
        .await;
    Arc::new(KeywordRetriever::new(store, config))
}

fn context(pairs: &[(&str, &str)]) -> Context {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_workers_behind_trait_objects() {
    let llm: Arc<dyn LlmClient> = Arc::new(StubLlmClient::new("stub-1"));
    let workers: Vec<Arc<dyn Worker>> = vec![
        Arc::new(SearchWorker::live(seeded_retriever().await, llm.clone())),
        Arc::new(IdeationWorker::live(llm)),
    ];

    for worker in &workers {
        let answer = worker.process("vendas", &Context::new()).await.unwrap();
        assert!(!answer.is_empty(), "{} returned nothing", worker.name());
    }
    let names: Vec<&str> = workers.iter().map(|w| w.name()).collect();
    assert_eq!(names, vec!["search", "ideation"]);
}

#[tokio::test]
async fn test_search_respects_tag_filter() {
    let worker = SearchWorker::live(
        seeded_retriever().await,
        Arc::new(StubLlmClient::new("stub-1")),
    );

    let answer = worker
        .process("vendas", &context(&[("tags", "financeiro")]))
        .await
        .unwrap();

    assert!(answer.contains("- Relatório de vendas"));
    assert!(!answer.contains("Plano de marketing"));
}

#[tokio::test]
async fn test_stub_mode_needs_no_collaborators() {
    let config = WorkerConfig {
        mode: WorkerMode::Stub,
        ..Default::default()
    };
    let search = SearchWorker::from_config(config.clone(), None, None).unwrap();
    let ideation = IdeationWorker::from_config(config, None).unwrap();

    assert_eq!(search.mode(), WorkerMode::Stub);
    assert!(search
        .process("atas", &Context::new())
        .await
        .unwrap()
        .contains("modo offline"));
    assert!(ideation
        .process("atas", &Context::new())
        .await
        .unwrap()
        .starts_with("Ideias para"));
}

#[tokio::test]
async fn test_custom_system_prompt_overrides_default() {
    let config = WorkerConfig {
        mode: WorkerMode::Live,
        system_prompt: Some("Responda em uma linha.".into()),
        ..Default::default()
    };
    let worker =
        IdeationWorker::from_config(config, Some(Arc::new(StubLlmClient::new("stub-1")))).unwrap();

    let answer = worker.process("slogan", &Context::new()).await.unwrap();
    assert!(answer.starts_with("Responda em uma linha."));
}
