//! Facade composing the cache, the compressor and the batch coalescer.

use crate::batch::{
    BatchConfig, BatchCoalescer, BatchMetrics, BatchProcessor, BatchStats, CoalescingLlmClient,
};
use crate::cache::{fingerprint, CacheConfig, CacheStats, ResponseCache};
use crate::compressor::{estimate_tokens, CompressionResult, ContextCompressor};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_common::{Context, ConversationTurn, Result};
use switchboard_llm::LlmClient;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Token budget for `compress_for_call` when none is given
    #[serde(default = "default_compression_budget")]
    pub compression_budget_tokens: usize,

    /// Turns kept by `optimize_history` when none is given
    #[serde(default = "default_history_max_turns")]
    pub history_max_turns: usize,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default = "default_true")]
    pub enable_cache: bool,
}

fn default_compression_budget() -> usize {
    1500
}

fn default_history_max_turns() -> usize {
    10
}

fn default_true() -> bool {
    true
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            compression_budget_tokens: default_compression_budget(),
            history_max_turns: default_history_max_turns(),
            batch: BatchConfig::default(),
            enable_cache: true,
        }
    }
}

#[derive(Debug, Default)]
struct Savings {
    cache_hits: AtomicU64,
    tokens_saved: AtomicU64,
    time_saved_ms: AtomicU64,
    compressions: AtomicU64,
    tokens_removed: AtomicU64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub cache: CacheStats,
    pub cache_hit_rate: f64,
    /// Estimated prompt plus completion tokens not sent downstream
    pub tokens_saved: u64,
    pub time_saved_ms: u64,
    pub compressions: u64,
    pub tokens_removed: u64,
    pub batch: BatchStats,
}

pub struct Optimizer {
    config: OptimizerConfig,
    cache: Arc<ResponseCache<String>>,
    compressor: ContextCompressor,
    batch_metrics: Arc<BatchMetrics>,
    savings: Savings,
}

impl Optimizer {
    pub fn new(config: OptimizerConfig) -> Self {
        info!(
            cache_capacity = config.cache.capacity,
            cache_ttl_secs = config.cache.default_ttl_secs,
            enable_cache = config.enable_cache,
            "Initializing optimizer"
        );
        Self {
            cache: Arc::new(ResponseCache::from_config(&config.cache)),
            compressor: ContextCompressor::new(),
            batch_metrics: Arc::new(BatchMetrics::default()),
            savings: Savings::default(),
            config,
        }
    }

    pub fn with_default_config() -> Self {
        Self::new(OptimizerConfig::default())
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<ResponseCache<String>> {
        &self.cache
    }

    /// Start the periodic cache sweep. Must be called inside a runtime.
    pub fn spawn_background(&self) -> JoinHandle<()> {
        self.cache
            .spawn_sweeper(Duration::from_secs(self.config.cache.sweep_interval_secs))
    }

    /// Memoize `call` under the fingerprint of `(text, args)`.
    ///
    /// Failures are returned as-is and never cached.
    pub async fn cached_call<F, Fut>(
        &self,
        text: &str,
        args: &Context,
        ttl: Option<Duration>,
        call: F,
    ) -> Result<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        if !self.config.enable_cache {
            return call().await;
        }

        let key = fingerprint(text, args);
        if let Some((value, cost)) = self.cache.get_with_cost(&key) {
            let tokens = estimate_tokens(text) + estimate_tokens(&value);
            self.savings.cache_hits.fetch_add(1, Ordering::Relaxed);
            self.savings
                .tokens_saved
                .fetch_add(tokens as u64, Ordering::Relaxed);
            self.savings
                .time_saved_ms
                .fetch_add(cost.as_millis() as u64, Ordering::Relaxed);
            debug!(tokens_saved = tokens, "Cache hit");
            return Ok(value);
        }

        let started = Instant::now();
        let value = call().await?;
        self.cache
            .set_with_cost(key, value.clone(), ttl, started.elapsed());
        Ok(value)
    }

    /// Compress `text` to `budget_tokens`, or the configured budget.
    pub fn compress_for_call(&self, text: &str, budget_tokens: Option<usize>) -> CompressionResult {
        let budget = budget_tokens.unwrap_or(self.config.compression_budget_tokens);
        let result = self.compressor.compress(text, budget);
        if result.was_compressed() {
            self.savings.compressions.fetch_add(1, Ordering::Relaxed);
            self.savings
                .tokens_removed
                .fetch_add(result.tokens_removed() as u64, Ordering::Relaxed);
            debug!(
                original = result.original_tokens,
                compressed = result.compressed_tokens,
                dropped_units = result.dropped_units,
                "Compressed context"
            );
        }
        result
    }

    pub fn optimize_history(
        &self,
        turns: &[ConversationTurn],
        max_turns: Option<usize>,
    ) -> Vec<ConversationTurn> {
        let max = max_turns.unwrap_or(self.config.history_max_turns);
        let kept = self.compressor.optimize_history(turns, max);
        if kept.len() < turns.len() {
            let removed: usize = turns
                .iter()
                .filter(|t| !kept.contains(t))
                .map(|t| estimate_tokens(&t.content))
                .sum();
            self.savings.compressions.fetch_add(1, Ordering::Relaxed);
            self.savings
                .tokens_removed
                .fetch_add(removed as u64, Ordering::Relaxed);
        }
        kept
    }

    /// A coalescer reporting into this optimizer's batch statistics.
    pub fn coalescer<T, R>(
        &self,
        processor: Arc<dyn BatchProcessor<T, R>>,
    ) -> Arc<BatchCoalescer<T, R>>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        Arc::new(BatchCoalescer::with_metrics(
            self.config.batch.clone(),
            processor,
            self.batch_metrics.clone(),
        ))
    }

    /// Wrap `client` so concurrent identical completions share one call.
    pub fn completion_coalescer(&self, client: Arc<dyn LlmClient>) -> CoalescingLlmClient {
        CoalescingLlmClient::with_metrics(
            client,
            self.config.batch.clone(),
            self.batch_metrics.clone(),
        )
    }

    pub fn stats(&self) -> OptimizerStats {
        let cache = self.cache.stats();
        OptimizerStats {
            cache_hit_rate: cache.hit_rate,
            cache,
            tokens_saved: self.savings.tokens_saved.load(Ordering::Relaxed),
            time_saved_ms: self.savings.time_saved_ms.load(Ordering::Relaxed),
            compressions: self.savings.compressions.load(Ordering::Relaxed),
            tokens_removed: self.savings.tokens_removed.load(Ordering::Relaxed),
            batch: self.batch_metrics.snapshot(),
        }
    }

    pub fn reset(&self) {
        self.cache.clear();
        self.batch_metrics.reset();
        for counter in [
            &self.savings.cache_hits,
            &self.savings.tokens_saved,
            &self.savings.time_saved_ms,
            &self.savings.compressions,
            &self.savings.tokens_removed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        info!("Optimizer reset");
    }
}
