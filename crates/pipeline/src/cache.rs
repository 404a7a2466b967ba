//! TTL caches for dialogue responses, knowledge context and synthesized audio
//!
//! Entries are checked against their expiry on every read; there is no
//! background eviction. Each cache is an injected service so sessions and
//! tests can use isolated instances.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use xxhash_rust::xxh3::xxh3_128;

use call_agent_config::CacheConfig;

use crate::delivery::AudioSegment;

/// Time source for expiry checks
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// Key for `(text, context)`: xxh3-128 over the length-prefixed text and the
/// context, so `("ab", "c")` and `("a", "bc")` never collide
pub fn cache_key(text: &str, context: &str) -> String {
    let mut buf = Vec::with_capacity(8 + text.len() + context.len());
    buf.extend_from_slice(&(text.len() as u64).to_le_bytes());
    buf.extend_from_slice(text.as_bytes());
    buf.extend_from_slice(context.as_bytes());
    format!("{:032x}", xxh3_128(&buf))
}

struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub expired: u64,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    expired: AtomicU64,
}

/// Concurrent key → value store whose entries expire after a fixed TTL
///
/// Concurrent writers to the same key race with last-writer-wins; values are
/// pure functions of their key so either result is valid.
pub struct TtlCache<V> {
    name: &'static str,
    ttl: Duration,
    entries: DashMap<String, CacheEntry<V>>,
    clock: Arc<dyn Clock>,
    counters: Counters,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(name: &'static str, ttl: Duration) -> Self {
        Self::with_clock(name, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(name: &'static str, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            ttl,
            entries: DashMap::new(),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Unexpired value for `key`; a stale entry is removed and reported as a miss
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();

        let fresh = match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => None,
            None => {
                self.record_miss();
                return None;
            }
        };

        match fresh {
            Some(value) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("call_agent_cache_hits_total", "cache" => self.name)
                    .increment(1);
                Some(value)
            }
            None => {
                // Guard from `get` is dropped; re-check so a concurrent
                // fresh insert is not thrown away
                if self
                    .entries
                    .remove_if(key, |_, e| now >= e.expires_at)
                    .is_some()
                {
                    self.counters.expired.fetch_add(1, Ordering::Relaxed);
                }
                self.record_miss();
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let expires_at = self.clock.now() + self.ttl;
        self.entries
            .insert(key.into(), CacheEntry { value, expires_at });
        self.counters.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Read-through: return the cached value or run `fetch` and store its
    /// result. Errors are returned as-is and nothing is cached.
    pub async fn get_or_try_insert_with<F, Fut, E>(&self, key: &str, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let value = fetch().await?;
        self.insert(key, value.clone());
        Ok(value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, e| now < e.expires_at);
        let removed = before.saturating_sub(self.entries.len());
        self.counters
            .expired
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    /// Number of stored entries, including ones not yet found stale
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            inserts: self.counters.inserts.load(Ordering::Relaxed),
            expired: self.counters.expired.load(Ordering::Relaxed),
        }
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("call_agent_cache_misses_total", "cache" => self.name).increment(1);
    }
}

/// The three independent response caches
pub struct ResponseCaches {
    pub dialogue: TtlCache<String>,
    pub knowledge: TtlCache<String>,
    pub audio: TtlCache<Vec<AudioSegment>>,
}

impl ResponseCaches {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: &CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            dialogue: TtlCache::with_clock(
                "dialogue",
                Duration::from_secs(config.dialogue_ttl_secs),
                clock.clone(),
            ),
            knowledge: TtlCache::with_clock(
                "knowledge",
                Duration::from_secs(config.knowledge_ttl_secs),
                clock.clone(),
            ),
            audio: TtlCache::with_clock(
                "audio",
                Duration::from_secs(config.audio_ttl_secs),
                clock,
            ),
        }
    }

    pub fn purge_expired(&self) -> usize {
        self.dialogue.purge_expired() + self.knowledge.purge_expired() + self.audio.purge_expired()
    }
}
