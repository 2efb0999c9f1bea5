//! Integration tests for the orchestrator's handle pipeline.
//!
//! Everything runs offline: stub workers, hand-written mock workers and the
//! stub completion client.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard_agents::{SearchWorker, WorkerMode};
use switchboard_bus::{HistoryFilter, MessageBus};
use switchboard_common::{
    Context, IntentCategory, MessageType, Result, SwitchboardError, Worker, HISTORY_KEY,
};
use switchboard_coordinator::special_cases::{EMPTY_RESPONSE, GREETING_RESPONSE, TOO_SHORT_RESPONSE};
use switchboard_coordinator::{
    Orchestrator, OrchestratorSettings, RetryPolicy, SwitchboardConfig, APOLOGY,
};
use switchboard_llm::{LlmClient, StubLlmClient};
use switchboard_optimizer::Optimizer;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Worker that counts calls and records the context it was given.
struct SimulatedWorker {
    name: String,
    calls: AtomicUsize,
    fail: bool,
    contexts: Mutex<Vec<Context>>,
}

impl SimulatedWorker {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
            fail: false,
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            calls: AtomicUsize::new(0),
            fail: true,
            contexts: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Worker for SimulatedWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, message: &str, context: &Context) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.contexts.lock().push(context.clone());
        if self.fail {
            return Err(SwitchboardError::delegation(&self.name, "falha simulada"));
        }
        Ok(format!("[{}] {}", self.name, message))
    }
}

fn orchestrator_with(llm: Arc<dyn LlmClient>) -> Orchestrator {
    init_tracing();
    Orchestrator::new(
        OrchestratorSettings::default(),
        Arc::new(Optimizer::with_default_config()),
        Arc::new(MessageBus::with_default_config()),
        llm,
    )
}

fn offline_orchestrator() -> Orchestrator {
    orchestrator_with(Arc::new(StubLlmClient::new("stub-1")))
}

// ============================================================================
// Short-circuits
// ============================================================================

#[tokio::test]
async fn test_help_lists_categories_without_bus_traffic() {
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(Arc::new(SearchWorker::stub()));

    let help = orchestrator.handle("ajuda", &Context::new()).await;

    for category in IntentCategory::SPECIALISED {
        assert!(help.contains(category.title()), "missing {category}");
    }
    let stats = orchestrator.stats();
    assert_eq!(stats.bus.sent, 0);
    assert_eq!(stats.orchestrator.special_responses, 1);
    assert!(orchestrator.conversation().is_empty());
}

#[tokio::test]
async fn test_empty_message_gets_canned_response() {
    let orchestrator = offline_orchestrator();
    let before = orchestrator.stats().bus.sent;

    let answer = orchestrator.handle("", &Context::new()).await;

    assert_eq!(answer, EMPTY_RESPONSE);
    assert_eq!(orchestrator.stats().bus.sent, before);
}

#[tokio::test]
async fn test_short_and_greeting_inputs() {
    let orchestrator = offline_orchestrator();

    let short = orchestrator.handle("?", &Context::new()).await;
    assert_eq!(short, TOO_SHORT_RESPONSE);

    let greeting = orchestrator.handle("Boa noite", &Context::new()).await;
    assert_eq!(greeting, GREETING_RESPONSE);
}

#[tokio::test]
async fn test_oversized_message_is_acknowledged_and_truncated() {
    let worker = SimulatedWorker::new("search");
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(worker.clone());

    let message = format!("buscar {}", "x".repeat(1500));
    let answer = orchestrator.handle(&message, &Context::new()).await;

    assert!(answer.starts_with("Sua mensagem tinha 1507 caracteres"));
    assert!(answer.contains("[search] buscar"));
    assert_eq!(orchestrator.conversation()[0].content.chars().count(), 1000);
}

// ============================================================================
// Delegation
// ============================================================================

#[tokio::test]
async fn test_multi_intent_with_missing_worker_uses_fallback() {
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(Arc::new(SearchWorker::stub()));

    let answer = orchestrator
        .handle("buscar X e também ideias para Y", &Context::new())
        .await;

    assert!(answer.contains("**1. Busca**\nBusca (modo offline)"));
    assert!(answer.contains("**2. Ideias**\nVocê é um assistente de ideias."));
    assert!(answer.contains("Resposta para: \"buscar X e também ideias para Y\""));

    let stats = orchestrator.stats();
    assert_eq!(stats.orchestrator.multi_intent, 1);
    assert_eq!(stats.orchestrator.delegations, 2);
    assert_eq!(stats.orchestrator.fallbacks, 1);
}

#[tokio::test]
async fn test_identical_requests_hit_the_cache() {
    let worker = SimulatedWorker::new("search");
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(worker.clone());

    let first = orchestrator.handle("buscar contratos", &Context::new()).await;
    let second = orchestrator.handle("buscar contratos", &Context::new()).await;

    assert_eq!(first, second);
    assert_eq!(worker.calls(), 1);
    assert_eq!(orchestrator.stats().optimizer.cache.hits, 1);

    // A different context is a different request.
    let context: Context = [("tags".to_string(), "ata".to_string())].into_iter().collect();
    orchestrator.handle("buscar contratos", &context).await;
    assert_eq!(worker.calls(), 2);
}

#[tokio::test]
async fn test_worker_failure_becomes_apology_and_is_not_cached() {
    let worker = SimulatedWorker::failing("search");
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(worker.clone());

    let first = orchestrator.handle("buscar contratos", &Context::new()).await;
    let second = orchestrator.handle("buscar contratos", &Context::new()).await;

    assert_eq!(first, APOLOGY);
    assert_eq!(second, APOLOGY);
    assert_eq!(worker.calls(), 2);
    assert_eq!(orchestrator.stats().orchestrator.errors, 2);
    assert_eq!(orchestrator.stats().optimizer.cache.entries, 0);
}

#[tokio::test]
async fn test_general_worker_takes_unclassified_requests() {
    let general = SimulatedWorker::new("general");
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(general.clone());

    let answer = orchestrator.handle("qual o horário de hoje?", &Context::new()).await;

    assert_eq!(answer, "[general] qual o horário de hoje?");
    assert_eq!(orchestrator.stats().orchestrator.fallbacks, 0);
}

#[tokio::test]
async fn test_history_is_passed_to_workers() {
    let worker = SimulatedWorker::new("search");
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(worker.clone());

    orchestrator.handle("buscar contratos", &Context::new()).await;
    orchestrator.handle("buscar atas", &Context::new()).await;

    let contexts = worker.contexts.lock();
    assert!(!contexts[0].contains_key(HISTORY_KEY));
    let history = &contexts[1][HISTORY_KEY];
    assert!(history.contains("usuário: buscar contratos"));
    assert!(history.contains("assistente: [search] buscar contratos"));
}

#[tokio::test]
async fn test_delegation_over_the_bus() {
    let worker = SimulatedWorker::new("search");
    let orchestrator = offline_orchestrator().with_bus_delivery(RetryPolicy::default());
    orchestrator.register_worker(worker.clone());

    let answer = orchestrator.handle("procurar a ata", &Context::new()).await;
    assert_eq!(answer, "[search] procurar a ata");

    let stats = orchestrator.stats();
    assert_eq!(stats.bus.by_type.get("request"), Some(&1));
    assert_eq!(stats.bus.by_type.get("response"), Some(&1));
    assert_eq!(stats.bus.queue_depth, 0);

    let requests = orchestrator.history(&HistoryFilter {
        recipient: Some("search".into()),
        message_type: Some(MessageType::Request),
        ..Default::default()
    });
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].payload, "procurar a ata");
}

#[tokio::test]
async fn test_failure_over_the_bus_is_contained() {
    let worker = SimulatedWorker::failing("search");
    let orchestrator = offline_orchestrator().with_bus_delivery(RetryPolicy::default());
    orchestrator.register_worker(worker.clone());

    let answer = orchestrator.handle("procurar a ata", &Context::new()).await;

    assert_eq!(answer, APOLOGY);
    assert_eq!(worker.calls(), 1);
    assert_eq!(orchestrator.stats().bus.errors, 1);
}

// ============================================================================
// Degraded mode
// ============================================================================

#[tokio::test]
async fn test_degraded_mode_latches_until_reset() {
    let llm = Arc::new(StubLlmClient::unavailable("stub-1"));
    let orchestrator = orchestrator_with(llm.clone());

    let answer = orchestrator.handle("qual a capital da França?", &Context::new()).await;
    assert!(answer.contains("indisponível"));
    assert!(orchestrator.is_degraded());
    assert_eq!(llm.calls(), 1);

    // The service comes back, but the session stays degraded.
    llm.set_unavailable(false);
    let again = orchestrator.handle("e a da Itália?", &Context::new()).await;
    assert!(again.contains("indisponível"));
    assert_eq!(llm.calls(), 1);
    assert_eq!(orchestrator.stats().orchestrator.degraded, 2);

    orchestrator.reset();
    assert!(!orchestrator.is_degraded());
    let recovered = orchestrator.handle("qual a capital da França?", &Context::new()).await;
    assert!(recovered.contains("Resposta para: \"qual a capital da França?\""));
    assert_eq!(llm.calls(), 2);
}

// ============================================================================
// Stats, reset, configuration
// ============================================================================

#[tokio::test]
async fn test_stats_serialize_with_portuguese_keys() {
    let orchestrator = offline_orchestrator();
    orchestrator.handle("buscar contratos", &Context::new()).await;

    let value = serde_json::to_value(orchestrator.stats()).unwrap();
    assert!(value.get("mensagens_enviadas").is_some());
    assert!(value.get("agentes_registrados").is_some());
    assert!(value["otimizador"].get("cache_hit_rate").is_some());
    assert_eq!(value["orquestrador"]["requisicoes"], 1);
}

#[tokio::test]
async fn test_reset_clears_everything() {
    let orchestrator = offline_orchestrator().with_bus_delivery(RetryPolicy::default());
    orchestrator.register_worker(SimulatedWorker::new("search"));
    orchestrator.handle("buscar contratos", &Context::new()).await;

    orchestrator.reset();

    let stats = orchestrator.stats();
    assert_eq!(stats.bus.sent, 0);
    assert_eq!(stats.bus.history_size, 0);
    assert_eq!(stats.optimizer.cache.entries, 0);
    assert_eq!(stats.orchestrator.requests, 0);
    assert!(orchestrator.conversation().is_empty());
    assert_eq!(orchestrator.workers(), vec!["search"]);
}

#[tokio::test]
async fn test_non_empty_inputs_always_get_text() {
    let orchestrator = offline_orchestrator();
    orchestrator.register_worker(SimulatedWorker::failing("ideation"));

    let long = "x".repeat(2000);
    for input in ["a", "oi", "menu", "ideias e análise de vendas", "???", long.as_str()] {
        let answer = orchestrator.handle(input, &Context::new()).await;
        assert!(!answer.trim().is_empty(), "empty answer for {input:?}");
    }
}

#[tokio::test]
async fn test_from_config_wires_stub_workers() {
    let orchestrator = Orchestrator::from_config(&SwitchboardConfig::default(), None).unwrap();
    assert_eq!(orchestrator.workers(), vec!["ideation", "search"]);

    let answer = orchestrator
        .handle("ideias para o podcast", &Context::new())
        .await;
    assert!(answer.starts_with("Ideias para \"ideias para o podcast\""));
}

#[tokio::test(start_paused = true)]
async fn test_from_config_sweeps_expired_answers() {
    let config = SwitchboardConfig::from_toml(
        r#"
[optimizer.cache]
default_ttl_secs = 1
sweep_interval_secs = 1
"#,
    )
    .unwrap();
    let orchestrator = Orchestrator::from_config(&config, None).unwrap();

    orchestrator
        .handle("qual a capital da França?", &Context::new())
        .await;
    assert_eq!(orchestrator.optimizer().cache().len(), 1);

    tokio::time::sleep(std::time::Duration::from_secs(10)).await;

    assert_eq!(orchestrator.optimizer().cache().len(), 0);
    assert_eq!(orchestrator.stats().optimizer.cache.expirations, 1);
}

#[tokio::test]
async fn test_from_config_rejects_live_search_without_retriever() {
    let mut config = SwitchboardConfig::default();
    config.workers.search.mode = WorkerMode::Live;

    assert!(Orchestrator::from_config(&config, None).is_err());
}
