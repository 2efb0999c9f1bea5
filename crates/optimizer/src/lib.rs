//! Resource optimization for Switchboard: a TTL + LRU response cache, an
//! importance-based context compressor and a batch coalescer, composed by
//! the [`Optimizer`] facade that the orchestrator is constructed with.

pub mod batch;
pub mod cache;
pub mod compressor;
pub mod optimizer;

pub use batch::{
    BatchCoalescer, BatchConfig, BatchMetrics, BatchProcessor, BatchStats, CoalescingLlmClient,
    DedupCompletionBatcher, DEFAULT_KIND,
};
pub use cache::{fingerprint, CacheConfig, CacheStats, ResponseCache, Weighted};
pub use compressor::{estimate_tokens, CompressionResult, ContextCompressor};
pub use optimizer::{Optimizer, OptimizerConfig, OptimizerStats};
