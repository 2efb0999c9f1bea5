//! TTL + LRU bounded response cache.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::Duration;
use switchboard_common::text::normalize;
use switchboard_common::Context;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Rough size of a cached value, in bytes.
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// TTL applied when `set` is called without one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Period of the background expiry sweep
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_capacity() -> usize {
    256
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_sweep_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            default_ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

/// Deterministic key for a request: SHA-256 over the normalized text and the
/// named arguments in key order. Every field is length-prefixed.
pub fn fingerprint(text: &str, args: &Context) -> String {
    let mut hasher = Sha256::new();
    hash_field(&mut hasher, &normalize(text));
    hasher.update((args.len() as u64).to_le_bytes());
    for (name, value) in args {
        hash_field(&mut hasher, name);
        hash_field(&mut hasher, value);
    }
    hex::encode(hasher.finalize())
}

fn hash_field(hasher: &mut Sha256, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    created_at: Instant,
    last_accessed: Instant,
    ttl: Duration,
    size: usize,
    /// How long the call that produced `value` took
    compute_time: Duration,
    /// Position in the access order
    tick: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) >= self.ttl
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub total_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    /// tick -> key, oldest access first
    order: BTreeMap<u64, String>,
    next_tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Inner<V> {
    fn touch(&mut self, key: &str) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.order.remove(&entry.tick);
            entry.tick = tick;
            self.order.insert(tick, key.to_string());
        }
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(key)?;
        self.order.remove(&entry.tick);
        Some(entry)
    }

    fn evict_lru(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.entries.remove(&key);
        self.evictions += 1;
        Some(key)
    }
}

/// Key/value store bounded by entry count and per-entry TTL.
///
/// Reads refresh an entry's position in the access order; inserting at
/// capacity evicts the least-recently-accessed entry first. Expired entries
/// are dropped lazily on read and periodically by [`ResponseCache::spawn_sweeper`].
pub struct ResponseCache<V> {
    capacity: usize,
    default_ttl: Duration,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone + Weighted> ResponseCache<V> {
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            default_ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: BTreeMap::new(),
                next_tick: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, Duration::from_secs(config.default_ttl_secs))
    }

    pub fn get(&self, key: &str) -> Option<V> {
        self.get_with_cost(key).map(|(value, _)| value)
    }

    /// Value plus the time the original computation took.
    pub fn get_with_cost(&self, key: &str) -> Option<(V, Duration)> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let Some(expired) = inner.entries.get(key).map(|e| e.is_expired(now)) else {
            inner.misses += 1;
            return None;
        };

        if expired {
            inner.remove(key);
            inner.expirations += 1;
            inner.misses += 1;
            debug!(key = %short(key), "Cache entry expired on read");
            return None;
        }

        inner.touch(key);
        inner.hits += 1;
        let entry = inner.entries.get_mut(key)?;
        entry.last_accessed = now;
        Some((entry.value.clone(), entry.compute_time))
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        self.set_with_cost(key, value, ttl, Duration::ZERO);
    }

    pub fn set_with_cost(
        &self,
        key: impl Into<String>,
        value: V,
        ttl: Option<Duration>,
        compute_time: Duration,
    ) {
        let key = key.into();
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if inner.remove(&key).is_none() {
            while inner.entries.len() >= self.capacity {
                match inner.evict_lru() {
                    Some(evicted) => debug!(key = %short(&evicted), "Evicted LRU cache entry"),
                    None => break,
                }
            }
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.order.insert(tick, key.clone());
        inner.entries.insert(
            key,
            CacheEntry {
                size: value.weight(),
                value,
                created_at: now,
                last_accessed: now,
                ttl: ttl.unwrap_or(self.default_ttl),
                compute_time,
                tick,
            },
        );
    }

    pub fn contains(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|e| !e.is_expired(now))
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.inner.lock().remove(key).is_some()
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            inner.remove(key);
        }
        inner.expirations += expired.len() as u64;
        expired.len()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
        inner.hits = 0;
        inner.misses = 0;
        inner.evictions = 0;
        inner.expirations = 0;
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let lookups = inner.hits + inner.misses;
        CacheStats {
            entries: inner.entries.len(),
            capacity: self.capacity,
            total_size: inner.entries.values().map(|e| e.size).sum(),
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                inner.hits as f64 / lookups as f64
            },
        }
    }
}

impl<V: Clone + Weighted + Send + 'static> ResponseCache<V> {
    /// Periodically purge expired entries until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period.max(Duration::from_millis(10)));
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(purged, remaining = cache.len(), "Cache sweep");
                }
            }
        })
    }
}

fn short(key: &str) -> &str {
    key.get(..12).unwrap_or(key)
}
