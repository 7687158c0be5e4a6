//! Request cache
//!
//! Join lookups are fingerprinted and cached: a bounded in-process byte cache
//! sits in front of an optional networked key-value store. Values are JSON
//! strings. At most one build runs per call; calls with the same key during a
//! miss are not coalesced here, the quest engine above provides that
//! deduplication.

use crate::rowflow::error::{EtlError, EtlResult};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Configuration for cache behavior
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Time to live for cached values
    pub ttl: Duration,
    /// Byte budget of the in-process tier
    pub max_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            ttl: Duration::from_secs(60 * 60),
            max_bytes: 100 << 20, // 100 MiB
        }
    }
}

/// Cache performance statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStatistics {
    pub hits: u64,
    pub misses: u64,
    pub insertions: u64,
    pub evictions: u64,
}

struct CacheEntry {
    value: String,
    created_at: Instant,
}

struct LocalState {
    entries: HashMap<String, CacheEntry>,
    access_order: VecDeque<String>,
    bytes: usize,
    stats: CacheStatistics,
}

/// Bounded in-process tier: TTL expiry plus LRU eviction over a byte budget
pub struct LocalByteCache {
    state: Mutex<LocalState>,
    config: CacheConfig,
}

impl LocalByteCache {
    pub fn new(config: CacheConfig) -> Self {
        LocalByteCache {
            state: Mutex::new(LocalState {
                entries: HashMap::new(),
                access_order: VecDeque::new(),
                bytes: 0,
                stats: CacheStatistics::default(),
            }),
            config,
        }
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock().await;
        let expired = state
            .entries
            .get(key)
            .map(|entry| entry.created_at.elapsed() > self.config.ttl);
        match expired {
            None => {
                state.stats.misses += 1;
                None
            }
            Some(true) => {
                Self::evict(&mut state, key);
                state.stats.misses += 1;
                None
            }
            Some(false) => {
                state.access_order.retain(|k| k != key);
                state.access_order.push_back(key.to_string());
                state.stats.hits += 1;
                state.entries.get(key).map(|entry| entry.value.clone())
            }
        }
    }

    pub async fn insert(&self, key: &str, value: String) {
        let mut state = self.state.lock().await;
        if state.entries.contains_key(key) {
            Self::evict(&mut state, key);
        }
        let entry_bytes = key.len() + value.len();
        while state.bytes + entry_bytes > self.config.max_bytes {
            let oldest = match state.access_order.front().cloned() {
                Some(oldest) => oldest,
                None => break,
            };
            Self::evict(&mut state, &oldest);
            state.stats.evictions += 1;
        }
        state.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                created_at: Instant::now(),
            },
        );
        state.access_order.push_back(key.to_string());
        state.bytes += entry_bytes;
        state.stats.insertions += 1;
    }

    pub async fn statistics(&self) -> CacheStatistics {
        self.state.lock().await.stats.clone()
    }

    fn evict(state: &mut LocalState, key: &str) {
        if let Some(entry) = state.entries.remove(key) {
            state.bytes -= key.len() + entry.value.len();
            state.access_order.retain(|k| k != key);
        }
    }
}

/// Networked key-value tier behind the local cache. The production wiring
/// injects a Redis-backed implementation; an in-memory one ships for tests.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, key: &str) -> EtlResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> EtlResult<()>;
}

/// In-memory remote tier
pub struct InMemoryRemoteStore {
    entries: Mutex<HashMap<String, (String, Instant, Duration)>>,
}

impl InMemoryRemoteStore {
    pub fn new() -> Self {
        InMemoryRemoteStore {
            entries: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn get(&self, key: &str) -> EtlResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        let expired = entries
            .get(key)
            .map(|(_, created_at, ttl)| created_at.elapsed() > *ttl);
        match expired {
            None => Ok(None),
            Some(true) => {
                entries.remove(key);
                Ok(None)
            }
            Some(false) => Ok(entries.get(key).map(|(value, _, _)| value.clone())),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> EtlResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now(), ttl));
        Ok(())
    }
}

/// Two-tier fingerprint-to-JSON store with build-on-miss
pub struct KeyValueCache {
    local: LocalByteCache,
    remote: Option<Arc<dyn RemoteStore>>,
    ttl: Duration,
}

impl KeyValueCache {
    pub fn new(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>) -> Self {
        let ttl = config.ttl;
        KeyValueCache {
            local: LocalByteCache::new(config),
            remote,
            ttl,
        }
    }

    /// Return the cached value for `key`, or run `build`, stringify its
    /// result (JSON unless it is already a string), store it under `key`
    /// with the configured TTL and return it. Remote tier failures are
    /// logged and never fail the call.
    pub async fn retrieve<F, Fut>(&self, key: &str, build: F) -> EtlResult<String>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = EtlResult<serde_json::Value>>,
    {
        if let Some(value) = self.local.get(key).await {
            log::debug!("cache hit for key {}", key);
            return Ok(value);
        }
        if let Some(remote) = &self.remote {
            match remote.get(key).await {
                Ok(Some(value)) => {
                    log::debug!("remote cache hit for key {}", key);
                    self.local.insert(key, value.clone()).await;
                    return Ok(value);
                }
                Ok(None) => {}
                Err(err) => log::warn!(
                    "{}",
                    EtlError::cache_failed(key, format!("remote read failed: {}", err))
                ),
            }
        }

        log::debug!("cache miss for key {}; fetching data", key);
        let built = build().await?;
        let value = value_to_string(built);
        log::debug!("saving key {} in cache", key);
        self.local.insert(key, value.clone()).await;
        if let Some(remote) = &self.remote {
            if let Err(err) = remote.set(key, &value, self.ttl).await {
                log::warn!(
                    "{}",
                    EtlError::cache_failed(key, format!("remote write failed: {}", err))
                );
            }
        }
        Ok(value)
    }

    pub async fn statistics(&self) -> CacheStatistics {
        self.local.statistics().await
    }
}

fn value_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(remote: Option<Arc<dyn RemoteStore>>) -> KeyValueCache {
        KeyValueCache::new(CacheConfig::default(), remote)
    }

    #[tokio::test]
    async fn test_build_runs_once_per_key() {
        let cache = cache(None);
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .retrieve("users->id:7#", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!({"id": 7}))
                })
                .await
                .unwrap();
            assert_eq!(value, "{\"id\":7}");
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);

        let stats = cache.statistics().await;
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_string_values_are_not_requoted() {
        let cache = cache(None);
        let value = cache
            .retrieve("k", || async { Ok(serde_json::Value::String("plain".to_string())) })
            .await
            .unwrap();
        assert_eq!(value, "plain");
    }

    #[tokio::test]
    async fn test_build_errors_propagate_and_are_not_cached() {
        let cache = cache(None);
        let result = cache
            .retrieve("k", || async {
                Err(EtlError::accessor_failed("http://x", "boom"))
            })
            .await;
        assert!(result.is_err());

        let value = cache
            .retrieve("k", || async { Ok(serde_json::json!(1)) })
            .await
            .unwrap();
        assert_eq!(value, "1");
    }

    #[tokio::test]
    async fn test_remote_tier_fills_local() {
        let remote = Arc::new(InMemoryRemoteStore::new());
        remote.set("k", "remote-value", Duration::from_secs(60)).await.unwrap();

        let cache = cache(Some(remote as Arc<dyn RemoteStore>));
        let value = cache
            .retrieve("k", || async { panic!("build must not run on a remote hit") })
            .await
            .unwrap();
        assert_eq!(value, "remote-value");

        // second call is served by the local tier
        let stats_before = cache.statistics().await;
        let value = cache
            .retrieve("k", || async { panic!("build must not run on a local hit") })
            .await
            .unwrap();
        assert_eq!(value, "remote-value");
        assert_eq!(cache.statistics().await.hits, stats_before.hits + 1);
    }

    #[tokio::test]
    async fn test_remote_write_failure_is_swallowed() {
        struct FailingStore;

        #[async_trait]
        impl RemoteStore for FailingStore {
            async fn get(&self, _key: &str) -> EtlResult<Option<String>> {
                Ok(None)
            }
            async fn set(&self, key: &str, _value: &str, _ttl: Duration) -> EtlResult<()> {
                Err(EtlError::cache_failed(key, "connection refused"))
            }
        }

        let cache = cache(Some(Arc::new(FailingStore) as Arc<dyn RemoteStore>));
        let value = cache
            .retrieve("k", || async { Ok(serde_json::json!("v")) })
            .await
            .unwrap();
        assert_eq!(value, "v");
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let config = CacheConfig {
            ttl: Duration::from_millis(10),
            ..Default::default()
        };
        let cache = KeyValueCache::new(config, None);
        let builds = AtomicUsize::new(0);

        for _ in 0..2 {
            cache
                .retrieve("k", || async {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(serde_json::json!(1))
                })
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_byte_budget_evicts_least_recently_used() {
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            max_bytes: 40,
        };
        let local = LocalByteCache::new(config);

        local.insert("a", "0123456789".to_string()).await;
        local.insert("b", "0123456789".to_string()).await;
        local.insert("c", "0123456789".to_string()).await;

        // a is the least recently used and the budget only fits three
        local.insert("d", "0123456789".to_string()).await;
        assert!(local.get("a").await.is_none());
        assert!(local.get("d").await.is_some());
    }
}
