//! Batch coalescing of independent requests.
//!
//! Requests submitted within a short window are grouped by kind and handed
//! to a [`BatchProcessor`] as one call per kind. Each submitter receives the
//! result at its own position in the batch.

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_common::{Result, SwitchboardError};
use switchboard_llm::{LlmClient, LlmRequest, LlmResponse};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Bucket for items submitted without a kind.
pub const DEFAULT_KIND: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Flush as soon as this many items are buffered
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Flush this long after the first buffered item
    #[serde(default = "default_max_wait_ms")]
    pub max_wait_ms: u64,
}

fn default_max_batch_size() -> usize {
    10
}

fn default_max_wait_ms() -> u64 {
    50
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            max_wait_ms: default_max_wait_ms(),
        }
    }
}

/// Handles a homogeneous batch. Must return exactly one result per item,
/// in input order.
#[async_trait]
pub trait BatchProcessor<T, R>: Send + Sync {
    async fn process_batch(&self, kind: &str, items: Vec<T>) -> Result<Vec<R>>;
}

#[derive(Debug, Default)]
pub struct BatchMetrics {
    submitted: AtomicU64,
    flushes: AtomicU64,
    batches: AtomicU64,
    items: AtomicU64,
    failures: AtomicU64,
}

impl BatchMetrics {
    pub fn snapshot(&self) -> BatchStats {
        let batches = self.batches.load(Ordering::Relaxed);
        let items = self.items.load(Ordering::Relaxed);
        BatchStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            batches,
            items,
            calls_saved: items.saturating_sub(batches),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.submitted.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
        self.batches.store(0, Ordering::Relaxed);
        self.items.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchStats {
    pub submitted: u64,
    pub flushes: u64,
    /// Processor invocations
    pub batches: u64,
    /// Items that reached a processor
    pub items: u64,
    pub calls_saved: u64,
    pub failures: u64,
}

struct Pending<T, R> {
    kind: String,
    item: T,
    reply: oneshot::Sender<Result<R>>,
}

struct Buffer<T, R> {
    items: Vec<Pending<T, R>>,
    /// Bumped on every flush so a stale timer leaves the next window alone.
    generation: u64,
}

pub struct BatchCoalescer<T, R> {
    config: BatchConfig,
    processor: Arc<dyn BatchProcessor<T, R>>,
    buffer: Mutex<Buffer<T, R>>,
    metrics: Arc<BatchMetrics>,
}

impl<T, R> BatchCoalescer<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    pub fn new(config: BatchConfig, processor: Arc<dyn BatchProcessor<T, R>>) -> Self {
        Self::with_metrics(config, processor, Arc::new(BatchMetrics::default()))
    }

    /// Share counters with other coalescers.
    pub fn with_metrics(
        config: BatchConfig,
        processor: Arc<dyn BatchProcessor<T, R>>,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        Self {
            config: BatchConfig {
                max_batch_size: config.max_batch_size.max(1),
                ..config
            },
            processor,
            buffer: Mutex::new(Buffer {
                items: Vec::new(),
                generation: 0,
            }),
            metrics,
        }
    }

    /// Queue `item` and wait for its result.
    pub async fn submit(self: &Arc<Self>, kind: Option<&str>, item: T) -> Result<R> {
        let (tx, rx) = oneshot::channel();
        let pending = Pending {
            kind: kind.unwrap_or(DEFAULT_KIND).to_string(),
            item,
            reply: tx,
        };
        self.metrics.submitted.fetch_add(1, Ordering::Relaxed);

        let full = {
            let mut buffer = self.buffer.lock();
            buffer.items.push(pending);
            if buffer.items.len() >= self.config.max_batch_size {
                buffer.generation += 1;
                Some(std::mem::take(&mut buffer.items))
            } else {
                if buffer.items.len() == 1 {
                    self.arm_timer(buffer.generation);
                }
                None
            }
        };

        // Flushed on a detached task: the batch must outlive a cancelled submitter.
        if let Some(batch) = full {
            debug!(size = batch.len(), "Batch full, flushing");
            let this = Arc::clone(self);
            tokio::spawn(async move { this.dispatch(batch).await });
        }

        rx.await.unwrap_or_else(|_| {
            Err(SwitchboardError::UpstreamUnavailable(
                "batch dropped before completion".into(),
            ))
        })
    }

    /// Dispatch whatever is buffered right now.
    pub async fn flush(&self) {
        let batch = {
            let mut buffer = self.buffer.lock();
            if buffer.items.is_empty() {
                return;
            }
            buffer.generation += 1;
            std::mem::take(&mut buffer.items)
        };
        self.dispatch(batch).await;
    }

    pub fn pending(&self) -> usize {
        self.buffer.lock().items.len()
    }

    pub fn stats(&self) -> BatchStats {
        self.metrics.snapshot()
    }

    fn arm_timer(self: &Arc<Self>, generation: u64) {
        let this = Arc::clone(self);
        let wait = Duration::from_millis(self.config.max_wait_ms);
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let batch = {
                let mut buffer = this.buffer.lock();
                if buffer.generation != generation || buffer.items.is_empty() {
                    return;
                }
                buffer.generation += 1;
                std::mem::take(&mut buffer.items)
            };
            debug!(size = batch.len(), "Batch window elapsed, flushing");
            this.dispatch(batch).await;
        });
    }

    async fn dispatch(&self, batch: Vec<Pending<T, R>>) {
        self.metrics.flushes.fetch_add(1, Ordering::Relaxed);

        // Group by kind, keeping first-seen order between groups.
        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, (Vec<T>, Vec<oneshot::Sender<Result<R>>>)> =
            HashMap::new();
        for pending in batch {
            let group = groups.entry(pending.kind.clone()).or_insert_with(|| {
                order.push(pending.kind.clone());
                (Vec::new(), Vec::new())
            });
            group.0.push(pending.item);
            group.1.push(pending.reply);
        }

        let calls = order.into_iter().filter_map(|kind| {
            let (items, replies) = groups.remove(&kind)?;
            Some(self.run_group(kind, items, replies))
        });
        join_all(calls).await;
    }

    async fn run_group(
        &self,
        kind: String,
        items: Vec<T>,
        replies: Vec<oneshot::Sender<Result<R>>>,
    ) {
        let expected = items.len();
        self.metrics.batches.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .items
            .fetch_add(expected as u64, Ordering::Relaxed);

        let outcome = self.processor.process_batch(&kind, items).await;
        match outcome {
            Ok(results) if results.len() == expected => {
                for (reply, result) in replies.into_iter().zip(results) {
                    let _ = reply.send(Ok(result));
                }
            }
            Ok(results) => {
                warn!(
                    kind = %kind,
                    expected,
                    got = results.len(),
                    "Batch processor returned wrong number of results"
                );
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                let err = SwitchboardError::Validation(format!(
                    "batch '{kind}' returned {} results for {expected} items",
                    results.len()
                ));
                for reply in replies {
                    let _ = reply.send(Err(err.clone()));
                }
            }
            Err(e) => {
                warn!(kind = %kind, error = %e, "Batch processor failed");
                self.metrics.failures.fetch_add(1, Ordering::Relaxed);
                for reply in replies {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }
    }
}

/// Completion batches that call the client once per distinct request.
pub struct DedupCompletionBatcher {
    client: Arc<dyn LlmClient>,
}

impl DedupCompletionBatcher {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BatchProcessor<LlmRequest, LlmResponse> for DedupCompletionBatcher {
    async fn process_batch(
        &self,
        kind: &str,
        items: Vec<LlmRequest>,
    ) -> Result<Vec<LlmResponse>> {
        let mut unique: Vec<LlmRequest> = Vec::new();
        let mut slots: Vec<usize> = Vec::with_capacity(items.len());
        for item in items {
            match unique.iter().position(|u| *u == item) {
                Some(idx) => slots.push(idx),
                None => {
                    slots.push(unique.len());
                    unique.push(item);
                }
            }
        }

        debug!(
            kind = %kind,
            items = slots.len(),
            unique = unique.len(),
            "Completing batch"
        );

        let responses = join_all(unique.into_iter().map(|r| self.client.complete(r)))
            .await
            .into_iter()
            .collect::<Result<Vec<_>>>()?;

        Ok(slots.into_iter().map(|i| responses[i].clone()).collect())
    }
}

/// [`LlmClient`] whose calls are coalesced, with the system prompt as kind.
pub struct CoalescingLlmClient {
    model: String,
    coalescer: Arc<BatchCoalescer<LlmRequest, LlmResponse>>,
}

impl CoalescingLlmClient {
    pub fn new(client: Arc<dyn LlmClient>, config: BatchConfig) -> Self {
        Self::with_metrics(client, config, Arc::new(BatchMetrics::default()))
    }

    pub fn with_metrics(
        client: Arc<dyn LlmClient>,
        config: BatchConfig,
        metrics: Arc<BatchMetrics>,
    ) -> Self {
        let model = client.model_name().to_string();
        let processor = Arc::new(DedupCompletionBatcher::new(client));
        Self {
            model,
            coalescer: Arc::new(BatchCoalescer::with_metrics(config, processor, metrics)),
        }
    }

    pub fn stats(&self) -> BatchStats {
        self.coalescer.stats()
    }
}

#[async_trait]
impl LlmClient for CoalescingLlmClient {
    async fn complete(&self, request: LlmRequest) -> Result<LlmResponse> {
        let kind = request.system_prompt.clone();
        self.coalescer.submit(kind.as_deref(), request).await
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
