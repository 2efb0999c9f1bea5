//! The top-level router.
//!
//! Every request walks the same state machine:
//!
//! ```text
//! Received -> SpecialCaseCheck -> SpecialResponse
//!                              \-> Classify -> Single -> Delegate -----------------------> Respond
//!                                           \-> Multiple -> Decompose -> DelegateEach
//!                                                                     -> Concatenate -> Respond
//! ```
//!
//! Classification and delegation run inside the optimizer's memoizing call,
//! so identical `(message, context)` pairs are answered from the cache.
//! Worker failures are contained here and never cached.

use crate::classifier::{IntentClassifier, KeywordClassifier};
use crate::config::{OrchestratorSettings, SwitchboardConfig};
use crate::dispatch::{BusDispatcher, RetryPolicy};
use crate::special_cases::{precheck, Precheck};
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use switchboard_agents::{IdeationWorker, SearchWorker};
use switchboard_bus::{BusStats, HistoryFilter, MessageBus};
use switchboard_common::{
    render_history, Context, Conversation, ConversationTurn, Envelope, IntentCategory, Result,
    SwitchboardError, Worker, HISTORY_KEY,
};
use switchboard_llm::{build_llm_client, complete_text, DegradingClient, LlmClient};
use switchboard_memory::Retriever;
use switchboard_optimizer::{Optimizer, OptimizerStats};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Bus name of the orchestrator's reply mailbox.
pub const ORCHESTRATOR_NAME: &str = "orchestrator";

pub const APOLOGY: &str =
    "Desculpe, não consegui concluir seu pedido agora. Tente novamente em instantes.";

const GENERAL_SYSTEM_PROMPT: &str = r#"Você é um assistente prestativo e objetivo.
Responda em português, de forma clara e direta.
Se não souber a resposta, diga isso."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Received,
    SpecialCaseCheck,
    SpecialResponse,
    Classify,
    Single,
    Delegate,
    Multiple,
    Decompose,
    DelegateEach,
    Concatenate,
    Respond,
}

/// Current state of one request, traced on every move.
struct Trace {
    request: u64,
    state: RouteState,
}

impl Trace {
    fn new(request: u64) -> Self {
        Self {
            request,
            state: RouteState::Received,
        }
    }

    fn to(&mut self, next: RouteState) {
        debug!(request = self.request, from = ?self.state, to = ?next, "Route transition");
        self.state = next;
    }
}

/// Text produced for one category, and whether it may be cached.
struct Delegated {
    text: String,
    complete: bool,
}

impl Delegated {
    fn ok(text: String) -> Self {
        Self {
            text,
            complete: true,
        }
    }

    fn partial(text: String) -> Self {
        Self {
            text,
            complete: false,
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    requests: AtomicU64,
    special_responses: AtomicU64,
    delegations: AtomicU64,
    multi_intent: AtomicU64,
    fallbacks: AtomicU64,
    degraded: AtomicU64,
    errors: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OrchestratorStats {
        OrchestratorStats {
            requests: self.requests.load(Ordering::Relaxed),
            special_responses: self.special_responses.load(Ordering::Relaxed),
            delegations: self.delegations.load(Ordering::Relaxed),
            multi_intent: self.multi_intent.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            degraded: self.degraded.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.requests,
            &self.special_responses,
            &self.delegations,
            &self.multi_intent,
            &self.fallbacks,
            &self.degraded,
            &self.errors,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStats {
    #[serde(rename = "requisicoes")]
    pub requests: u64,

    #[serde(rename = "respostas_especiais")]
    pub special_responses: u64,

    /// Worker or fallback invocations, one per category
    #[serde(rename = "delegacoes")]
    pub delegations: u64,

    #[serde(rename = "multiplas_intencoes")]
    pub multi_intent: u64,

    #[serde(rename = "respostas_genericas")]
    pub fallbacks: u64,

    #[serde(rename = "respostas_degradadas")]
    pub degraded: u64,

    #[serde(rename = "erros_agentes")]
    pub errors: u64,
}

/// Everything `Orchestrator::stats` reports. Bus counters sit at the top
/// level of the serialized map.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStats {
    #[serde(flatten)]
    pub bus: BusStats,

    #[serde(rename = "otimizador")]
    pub optimizer: OptimizerStats,

    #[serde(rename = "orquestrador")]
    pub orchestrator: OrchestratorStats,

    #[serde(rename = "modo_degradado")]
    pub degraded_mode: bool,
}

/// Background task aborted when its owner is dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub struct Orchestrator {
    settings: OrchestratorSettings,
    classifier: Arc<dyn IntentClassifier>,
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
    optimizer: Arc<Optimizer>,
    bus: Arc<MessageBus>,
    dispatcher: Option<BusDispatcher>,
    degrading: Arc<DegradingClient>,
    /// `degrading` behind the optimizer's completion coalescer
    completion: Arc<dyn LlmClient>,
    conversation: Mutex<Conversation>,
    counters: Counters,
    sweeper: Option<AbortOnDrop>,
}

impl Orchestrator {
    /// An orchestrator with the keyword classifier and no workers.
    ///
    /// `llm` backs the generic completion used when no worker is registered
    /// for a category; it is wrapped in the session-wide degraded-mode latch
    /// and the optimizer's completion coalescer.
    pub fn new(
        settings: OrchestratorSettings,
        optimizer: Arc<Optimizer>,
        bus: Arc<MessageBus>,
        llm: Arc<dyn LlmClient>,
    ) -> Self {
        info!(
            max_input_chars = settings.max_input_chars,
            conversation_capacity = settings.conversation_capacity,
            model = %llm.model_name(),
            "Creating orchestrator"
        );

        let degrading = Arc::new(DegradingClient::new(llm));
        let completion: Arc<dyn LlmClient> =
            Arc::new(optimizer.completion_coalescer(degrading.clone()));
        bus.register(ORCHESTRATOR_NAME, None, None);

        Self {
            conversation: Mutex::new(Conversation::new(settings.conversation_capacity)),
            settings,
            classifier: Arc::new(KeywordClassifier::default()),
            workers: RwLock::new(HashMap::new()),
            optimizer,
            bus,
            dispatcher: None,
            degrading,
            completion,
            counters: Counters::default(),
            sweeper: None,
        }
    }

    /// Build the optimizer, the bus, the completion client and both shipped
    /// workers from `config`. A live search worker needs `retriever`.
    ///
    /// Inside a Tokio runtime the cache expiry sweep is started as well.
    pub fn from_config(
        config: &SwitchboardConfig,
        retriever: Option<Arc<dyn Retriever>>,
    ) -> Result<Self> {
        let optimizer = Arc::new(Optimizer::new(config.optimizer.clone()));
        let bus = Arc::new(MessageBus::new(config.bus.bus_config()));
        let llm = build_llm_client(&config.llm)?;

        let mut orchestrator = Self::new(config.orchestrator.clone(), optimizer, bus, llm)
            .with_classifier(Arc::new(KeywordClassifier::new(config.classifier.clone())));
        if config.bus.deliver_via_bus {
            orchestrator = orchestrator.with_bus_delivery(config.bus.retry.clone());
        }
        if tokio::runtime::Handle::try_current().is_ok() {
            orchestrator = orchestrator.with_cache_sweeper();
        }

        let completion = orchestrator.completion_client();
        let search = SearchWorker::from_config(
            config.workers.search.clone(),
            retriever,
            Some(completion.clone()),
        )?;
        let ideation = IdeationWorker::from_config(config.workers.ideation.clone(), Some(completion))?;

        orchestrator.register_worker(Arc::new(search));
        orchestrator.register_worker(Arc::new(ideation));
        Ok(orchestrator)
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn IntentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Purge expired cache entries periodically for as long as this
    /// orchestrator lives. Must be called inside a runtime.
    pub fn with_cache_sweeper(mut self) -> Self {
        info!(
            interval_secs = self.optimizer.config().cache.sweep_interval_secs,
            "Starting cache sweeper"
        );
        self.sweeper = Some(AbortOnDrop(self.optimizer.spawn_background()));
        self
    }

    /// Delegate through request/response envelopes on the bus.
    pub fn with_bus_delivery(mut self, policy: RetryPolicy) -> Self {
        info!(
            max_attempts = policy.max_attempts,
            reply_timeout_ms = policy.reply_timeout_ms,
            "Delegating through the message bus"
        );
        self.dispatcher = Some(BusDispatcher::new(
            self.bus.clone(),
            ORCHESTRATOR_NAME,
            policy,
        ));
        self
    }

    /// Completion client shared with live workers, so they observe the same
    /// degraded-mode latch.
    pub fn completion_client(&self) -> Arc<dyn LlmClient> {
        self.completion.clone()
    }

    /// Register `worker` under its name, replacing any previous worker with
    /// that name, and as a bus recipient.
    pub fn register_worker(&self, worker: Arc<dyn Worker>) {
        let name = worker.name().to_string();
        info!(agent = %name, "Registering worker");
        self.bus.register(name.clone(), Some(worker.clone()), None);
        self.workers.write().insert(name, worker);
    }

    pub fn deregister_worker(&self, name: &str) -> bool {
        self.bus.deregister(name);
        self.workers.write().remove(name).is_some()
    }

    pub fn workers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.workers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    pub fn optimizer(&self) -> &Arc<Optimizer> {
        &self.optimizer
    }

    pub fn is_degraded(&self) -> bool {
        self.degrading.is_degraded()
    }

    pub fn conversation(&self) -> Vec<ConversationTurn> {
        self.conversation.lock().turns()
    }

    /// Answer one user message. Always returns text; failures are turned
    /// into an apology or a degraded answer.
    pub async fn handle(&self, message: &str, context: &Context) -> String {
        let request = self.counters.requests.fetch_add(1, Ordering::Relaxed) + 1;
        let mut trace = Trace::new(request);

        trace.to(RouteState::SpecialCaseCheck);
        let (text, notice) = match precheck(message, self.settings.max_input_chars) {
            Precheck::Respond(canned) => {
                trace.to(RouteState::SpecialResponse);
                Counters::bump(&self.counters.special_responses);
                return canned;
            }
            Precheck::Continue { text, notice } => (text, notice),
        };

        let mut worker_context = context.clone();
        if !worker_context.contains_key(HISTORY_KEY) {
            if let Some(history) = self.recent_history() {
                worker_context.insert(HISTORY_KEY.to_string(), history);
            }
        }

        // Partial answers are returned to the caller but kept out of the cache.
        let uncached: Mutex<Option<String>> = Mutex::new(None);
        let (routed_text, routed_context, routed_trace, slot) =
            (&text, &worker_context, &mut trace, &uncached);
        let result = self
            .optimizer
            .cached_call(&text, context, None, move || async move {
                let routed = self.route(routed_text, routed_context, routed_trace).await;
                if routed.complete {
                    Ok(routed.text)
                } else {
                    *slot.lock() = Some(routed.text);
                    Err(SwitchboardError::delegation(
                        ORCHESTRATOR_NAME,
                        "incomplete answer",
                    ))
                }
            })
            .await;

        let answer = match result {
            Ok(answer) => answer,
            Err(_) => uncached.lock().take().unwrap_or_else(|| APOLOGY.to_string()),
        };
        trace.to(RouteState::Respond);

        let response = match notice {
            Some(notice) => format!("{notice}\n\n{answer}"),
            None => answer,
        };

        let mut conversation = self.conversation.lock();
        conversation.push(ConversationTurn::user(text));
        conversation.push(ConversationTurn::agent(response.clone()));

        response
    }

    async fn route(&self, text: &str, context: &Context, trace: &mut Trace) -> Delegated {
        trace.to(RouteState::Classify);
        let intent = self.classifier.classify(text);

        if intent.is_multiple() {
            trace.to(RouteState::Multiple);
            trace.to(RouteState::Decompose);
            let categories: Vec<IntentCategory> = self
                .classifier
                .decompose(text)
                .into_iter()
                .filter(IntentCategory::is_specialised)
                .collect();

            if categories.len() > 1 {
                Counters::bump(&self.counters.multi_intent);
                trace.to(RouteState::DelegateEach);
                let results = join_all(
                    categories
                        .iter()
                        .map(|&category| self.delegate(category, text, context)),
                )
                .await;
                trace.to(RouteState::Concatenate);
                return concatenate(&categories, results);
            }

            let category = categories.first().copied().unwrap_or(IntentCategory::General);
            trace.to(RouteState::Single);
            trace.to(RouteState::Delegate);
            return self.delegate(category, text, context).await;
        }

        trace.to(RouteState::Single);
        trace.to(RouteState::Delegate);
        self.delegate(intent.category, text, context).await
    }

    /// Run `category`'s worker, or the generic completion when none is
    /// registered.
    async fn delegate(&self, category: IntentCategory, text: &str, context: &Context) -> Delegated {
        Counters::bump(&self.counters.delegations);
        let name = category.as_str();
        let worker = self.workers.read().get(name).cloned();

        let Some(worker) = worker else {
            return self.fallback(category, text, context).await;
        };

        debug!(agent = %name, via_bus = self.dispatcher.is_some(), "Delegating");
        let result = match &self.dispatcher {
            Some(dispatcher) => dispatcher.dispatch(name, text, context).await,
            None => worker.process(text, context).await,
        };

        match result {
            Ok(answer) if !answer.trim().is_empty() => Delegated::ok(answer),
            Ok(_) => {
                warn!(agent = %name, "Worker returned an empty answer");
                Counters::bump(&self.counters.errors);
                Delegated::partial(APOLOGY.to_string())
            }
            Err(e) if e.is_upstream() => {
                warn!(agent = %name, error = %e, "Worker upstream unavailable");
                Counters::bump(&self.counters.degraded);
                Delegated::partial(degraded_answer(category, text))
            }
            Err(e) => {
                warn!(agent = %name, error = %e, "Worker failed");
                Counters::bump(&self.counters.errors);
                Delegated::partial(APOLOGY.to_string())
            }
        }
    }

    async fn fallback(&self, category: IntentCategory, text: &str, context: &Context) -> Delegated {
        Counters::bump(&self.counters.fallbacks);
        debug!(category = %category, "No worker registered, using generic completion");

        let mut prompt = fallback_prompt(category);
        if let Some(history) = context.get(HISTORY_KEY).filter(|h| !h.is_empty()) {
            prompt.push_str(&format!("\nConversa recente:\n{history}\n"));
        }

        match complete_text(self.completion.as_ref(), &prompt, text, None).await {
            Ok(answer) if !answer.trim().is_empty() => Delegated::ok(answer),
            Ok(_) => {
                Counters::bump(&self.counters.errors);
                Delegated::partial(APOLOGY.to_string())
            }
            Err(e) if e.is_upstream() => {
                Counters::bump(&self.counters.degraded);
                debug!(category = %category, error = %e, "Generic completion unavailable");
                Delegated::partial(degraded_answer(category, text))
            }
            Err(e) => {
                warn!(category = %category, error = %e, "Generic completion failed");
                Counters::bump(&self.counters.errors);
                Delegated::partial(APOLOGY.to_string())
            }
        }
    }

    /// Recent turns, trimmed by the optimizer and rendered one per line.
    fn recent_history(&self) -> Option<String> {
        let turns = self.conversation.lock().turns();
        if turns.is_empty() {
            return None;
        }
        let kept = self.optimizer.optimize_history(&turns, None);
        let rendered = render_history(&kept);
        Some(self.optimizer.compress_for_call(&rendered, None).text)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            bus: self.bus.stats(),
            optimizer: self.optimizer.stats(),
            orchestrator: self.counters.snapshot(),
            degraded_mode: self.degrading.is_degraded(),
        }
    }

    pub fn history(&self, filter: &HistoryFilter) -> Vec<Envelope> {
        self.bus.history(filter)
    }

    /// Clear caches, queues, history, conversation and counters, and leave
    /// degraded mode.
    pub fn reset(&self) {
        self.optimizer.reset();
        self.bus.reset();
        self.conversation.lock().clear();
        self.counters.reset();
        self.degrading.reset();
        info!("Orchestrator reset");
    }
}

fn fallback_prompt(category: IntentCategory) -> String {
    if category.is_specialised() {
        format!(
            "Você é um assistente de {}. Sua tarefa é {}.\n\
             Responda em português, de forma clara e direta.",
            category.title().to_lowercase(),
            category.describe()
        )
    } else {
        GENERAL_SYSTEM_PROMPT.to_string()
    }
}

fn degraded_answer(category: IntentCategory, text: &str) -> String {
    let topic: String = text.trim().chars().take(80).collect();
    if category.is_specialised() {
        format!(
            "O serviço de respostas está indisponível no momento, então não consigo {} agora. \
             Anotei seu pedido (\"{topic}\"); tente novamente mais tarde.",
            category.describe()
        )
    } else {
        format!(
            "O serviço de respostas está indisponível no momento. \
             Anotei seu pedido (\"{topic}\"); tente novamente mais tarde."
        )
    }
}

fn concatenate(categories: &[IntentCategory], results: Vec<Delegated>) -> Delegated {
    let complete = results.iter().all(|r| r.complete);
    let sections: Vec<String> = categories
        .iter()
        .zip(results)
        .enumerate()
        .map(|(i, (category, result))| {
            format!("**{}. {}**\n{}", i + 1, category.title(), result.text.trim())
        })
        .collect();

    let text = format!(
        "Identifiquei {} pedidos na sua mensagem:\n\n{}",
        sections.len(),
        sections.join("\n\n")
    );
    Delegated { text, complete }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_llm::StubLlmClient;

    fn orchestrator(llm: Arc<dyn LlmClient>) -> Orchestrator {
        Orchestrator::new(
            OrchestratorSettings::default(),
            Arc::new(Optimizer::with_default_config()),
            Arc::new(MessageBus::with_default_config()),
            llm,
        )
    }

    #[test]
    fn test_trace_records_last_state() {
        let mut trace = Trace::new(1);
        trace.to(RouteState::SpecialCaseCheck);
        trace.to(RouteState::Classify);
        assert_eq!(trace.state, RouteState::Classify);
    }

    #[test]
    fn test_fallback_prompt_names_category() {
        let prompt = fallback_prompt(IntentCategory::Ideation);
        assert!(prompt.starts_with("Você é um assistente de ideias."));
        assert!(prompt.contains(IntentCategory::Ideation.describe()));
        assert_eq!(fallback_prompt(IntentCategory::General), GENERAL_SYSTEM_PROMPT);
    }

    #[test]
    fn test_concatenation_numbers_sections() {
        let merged = concatenate(
            &[IntentCategory::Search, IntentCategory::Analysis],
            vec![
                Delegated::ok("achei".into()),
                Delegated::partial(APOLOGY.into()),
            ],
        );
        assert!(!merged.complete);
        assert!(merged.text.contains("**1. Busca**\nachei"));
        assert!(merged.text.contains("**2. Análise**\n"));
    }

    #[tokio::test]
    async fn test_general_request_uses_generic_completion() {
        let llm = Arc::new(StubLlmClient::new("stub-1"));
        let orchestrator = orchestrator(llm.clone());

        let answer = orchestrator
            .handle("qual a capital da França?", &Context::new())
            .await;
        assert!(answer.starts_with("Você é um assistente prestativo e objetivo."));
        assert_eq!(llm.calls(), 1);

        let stats = orchestrator.stats();
        assert_eq!(stats.orchestrator.fallbacks, 1);
        assert_eq!(stats.optimizer.batch.submitted, 1);
    }

    #[tokio::test]
    async fn test_history_reaches_the_completion_prompt() {
        let orchestrator = orchestrator(Arc::new(StubLlmClient::new("stub-1")));
        orchestrator.handle("qual a capital da França?", &Context::new()).await;
        orchestrator.handle("e da Itália?", &Context::new()).await;

        let turns = orchestrator.conversation();
        assert_eq!(turns.len(), 4);
        assert_eq!(turns[2].content, "e da Itália?");
    }
}
