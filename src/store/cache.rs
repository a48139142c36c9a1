//! # Memory cache policy and wrapper.
//!
//! The memory layer is deliberately simple: bounded size plus
//! expire-after-write, backed by `moka`. No other eviction semantics are
//! part of the store contract.

use std::hash::Hash;
use std::time::Duration;

/// Sizing and expiry for the in-memory cache layer.
///
/// ## Field semantics
/// - `max_entries`: bound on resident entries; least-recently-used entries
///   are evicted past it
/// - `expire_after_write`: entries become invisible this long after insert
#[derive(Debug, Clone, Copy)]
pub struct CachePolicy {
    /// Maximum number of resident entries.
    pub max_entries: u64,
    /// Time-to-live measured from the write.
    pub expire_after_write: Duration,
}

impl Default for CachePolicy {
    /// Default policy: 100 entries, 24 hour TTL.
    fn default() -> Self {
        Self {
            max_entries: 100,
            expire_after_write: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Thin wrapper over `moka::future::Cache` configured from a [`CachePolicy`].
#[derive(Clone)]
pub(crate) struct MemoryCache<K, V> {
    cache: moka::future::Cache<K, V>,
}

impl<K, V> MemoryCache<K, V>
where
    K: Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(policy: CachePolicy) -> Self {
        Self {
            cache: moka::future::Cache::builder()
                .max_capacity(policy.max_entries)
                .time_to_live(policy.expire_after_write)
                .build(),
        }
    }

    pub(crate) async fn get(&self, key: &K) -> Option<V> {
        self.cache.get(key).await
    }

    pub(crate) async fn insert(&self, key: K, value: V) {
        self.cache.insert(key, value).await;
    }

    pub(crate) async fn invalidate(&self, key: &K) {
        self.cache.invalidate(key).await;
    }

    pub(crate) fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }
}
