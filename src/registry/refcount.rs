//! # Refcounted key→resource map with atomic acquire/release.
//!
//! [`RefcountRegistry`] tracks one shared resource per key together with a
//! reference count:
//! - `acquire` - create-or-increment, returns the (shared) resource
//! - `release` - decrement-or-destroy; the destroy callback runs exactly once
//!
//! ## Architecture
//! ```text
//! acquire(k, factory)              release(k)
//!     │                               │
//!     ▼                               ▼
//! ┌─────────────────────────────────────────────┐
//! │ Mutex<HashMap<K, Entry>>                    │
//! │   hit  → refs += 1, clone resource          │
//! │   miss → factory(), insert {refs: 1}        │
//! │   refs -= 1; 0 → remove + destroy(resource) │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Rules
//! - Acquire and release for the same key are serialized through one lock;
//!   a concurrent acquire never observes a half-destroyed resource.
//! - The destroy callback is awaited **while the lock is held**, so a new
//!   resource for the key cannot be created until destruction finished.
//!   The exception is `try_release` (drop paths): the entry is removed
//!   synchronously and teardown runs in the background, so a follow-up
//!   acquire builds a fresh resource instead of one that is shutting down.
//! - Releasing an untracked key is a lifecycle bug in the caller and fails
//!   loudly with [`StoreError::UntrackedRelease`].
//! - Inconsistent `Hash`/`Eq` implementations on `K` break deduplication
//!   silently; keys must have stable value equality and hashing.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::debug;

type DestroyFn<V> = Arc<dyn Fn(V) -> BoxFuture<'static, ()> + Send + Sync>;

/// Outcome of a synchronous [`RefcountRegistry::try_release`].
pub(crate) enum TryRelease {
    /// The count was decremented; other references remain.
    Released,
    /// Last reference gone: the entry was removed, caller drives teardown.
    Destroy(BoxFuture<'static, ()>),
}

struct Entry<V> {
    resource: V,
    refs: usize,
}

/// Refcounted registry of shared resources, keyed by `K`.
///
/// `V` is expected to be a cheap handle (`Arc<...>`); `acquire` hands out
/// clones while the registry keeps one under the entry.
pub struct RefcountRegistry<K, V> {
    entries: Mutex<HashMap<K, Entry<V>>>,
    on_destroy: DestroyFn<V>,
}

impl<K, V> RefcountRegistry<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Creates a registry with the given async destroy callback.
    ///
    /// The callback receives ownership of the resource exactly once, when the
    /// last reference is released.
    pub fn new<F, Fut>(on_destroy: F) -> Self
    where
        F: Fn(V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            entries: Mutex::new(HashMap::new()),
            on_destroy: Arc::new(move |resource| Box::pin(on_destroy(resource))),
        }
    }

    /// Returns the resource for `key`, creating it via `factory` on first use.
    ///
    /// ### Rules
    /// - Existing entry: increments the ref count, returns a clone.
    /// - No entry: invokes `factory` under the lock, stores with count 1.
    /// - `factory` must be cheap and non-blocking (it constructs a handle,
    ///   it does not fetch).
    pub async fn acquire(&self, key: K, factory: impl FnOnce() -> V) -> V {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&key) {
            entry.refs += 1;
            debug!(?key, refs = entry.refs, "registry: reusing resource");
            return entry.resource.clone();
        }
        let resource = factory();
        debug!(?key, "registry: created resource");
        entries.insert(
            key,
            Entry {
                resource: resource.clone(),
                refs: 1,
            },
        );
        resource
    }

    /// Drops one reference to `key`'s resource.
    ///
    /// When the count reaches zero the entry is removed and the destroy
    /// callback is awaited before the lock is given up, so a concurrent
    /// `acquire` for the same key observes either the live entry or a fully
    /// destroyed one, never a torn state.
    ///
    /// # Errors
    /// [`StoreError::UntrackedRelease`] if `key` is not currently tracked.
    ///
    /// [`StoreError::UntrackedRelease`]: crate::StoreError::UntrackedRelease
    pub async fn release(&self, key: &K) -> Result<(), crate::StoreError> {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(key) else {
            return Err(crate::StoreError::UntrackedRelease {
                key: format!("{key:?}"),
            });
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            debug!(?key, refs = entry.refs, "registry: released reference");
            return Ok(());
        }
        if let Some(entry) = entries.remove(key) {
            debug!(?key, "registry: destroying resource");
            (self.on_destroy)(entry.resource).await;
        }
        Ok(())
    }

    /// Non-blocking release for drop paths, where awaiting is impossible.
    ///
    /// Decrements synchronously under `try_lock`. When the count reaches
    /// zero the entry is removed **before returning** and the destroy future
    /// is handed back to the caller to drive in the background; a concurrent
    /// acquire for the same key then builds a fresh resource instead of
    /// reusing one that is shutting down.
    ///
    /// Returns `None` when the map lock is held; the caller must fall back
    /// to [`release`](Self::release).
    pub(crate) fn try_release(
        &self,
        key: &K,
    ) -> Option<Result<TryRelease, crate::StoreError>> {
        let mut entries = self.entries.try_lock().ok()?;
        let Some(entry) = entries.get_mut(key) else {
            return Some(Err(crate::StoreError::UntrackedRelease {
                key: format!("{key:?}"),
            }));
        };
        entry.refs -= 1;
        if entry.refs > 0 {
            debug!(?key, refs = entry.refs, "registry: released reference");
            return Some(Ok(TryRelease::Released));
        }
        let Some(entry) = entries.remove(key) else {
            return Some(Ok(TryRelease::Released));
        };
        debug!(?key, "registry: destroying resource");
        Some(Ok(TryRelease::Destroy((self.on_destroy)(entry.resource))))
    }

    /// Number of keys with a live entry (diagnostic).
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Returns true if no key is currently tracked.
    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Returns true if `key` currently has a live entry.
    pub async fn contains(&self, key: &K) -> bool {
        self.entries.lock().await.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_registry(
        destroyed: Arc<AtomicUsize>,
    ) -> RefcountRegistry<String, Arc<str>> {
        RefcountRegistry::new(move |_resource| {
            let destroyed = destroyed.clone();
            async move {
                destroyed.fetch_add(1, Ordering::SeqCst);
            }
        })
    }

    #[tokio::test]
    async fn factory_runs_once_destroy_runs_once_after_last_release() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let created = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(destroyed.clone());

        let make = || {
            created.fetch_add(1, Ordering::SeqCst);
            Arc::from("resource")
        };
        let a = registry.acquire("k".to_string(), make).await;
        let b = registry
            .acquire("k".to_string(), || panic!("factory must not rerun"))
            .await;
        assert_eq!(&*a, &*b);
        assert_eq!(created.load(Ordering::SeqCst), 1);

        registry.release(&"k".to_string()).await.unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 0, "still one ref held");
        assert!(registry.contains(&"k".to_string()).await);

        registry.release(&"k".to_string()).await.unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn untracked_release_fails_loudly() {
        let registry = counting_registry(Arc::new(AtomicUsize::new(0)));
        let err = registry.release(&"ghost".to_string()).await.unwrap_err();
        assert_eq!(err.as_label(), "store_untracked_release");

        // Double release is the same bug.
        registry.acquire("k".to_string(), || Arc::from("r")).await;
        registry.release(&"k".to_string()).await.unwrap();
        assert!(registry.release(&"k".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn try_release_removes_the_entry_before_teardown_runs() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(destroyed.clone());
        registry.acquire("k".to_string(), || Arc::from("r")).await;

        let outcome = registry.try_release(&"k".to_string()).expect("lock is free");
        let TryRelease::Destroy(teardown) = outcome.unwrap() else {
            panic!("last reference should trigger destroy");
        };
        // The entry is gone before the destroy future even runs.
        assert!(registry.is_empty().await);
        assert_eq!(destroyed.load(Ordering::SeqCst), 0);
        teardown.await;
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn acquire_after_destroy_creates_a_fresh_resource() {
        let destroyed = Arc::new(AtomicUsize::new(0));
        let registry = counting_registry(destroyed.clone());

        registry.acquire("k".to_string(), || Arc::from("first")).await;
        registry.release(&"k".to_string()).await.unwrap();

        let second = registry.acquire("k".to_string(), || Arc::from("second")).await;
        assert_eq!(&*second, "second");
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len().await, 1);
    }
}
