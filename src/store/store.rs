//! # Store: the public get/fresh/stream contract.
//!
//! ## Data flow
//! ```text
//! stream(request)
//!     │
//!     ├─ memory cache hit  (use_cache, !refresh) ──► Data(origin=Cache)
//!     ├─ source-of-truth hit         (!refresh)  ──► Data(origin=SourceOfTruth)
//!     │                                              (also fills the cache)
//!     └─ miss or refresh:
//!          Loading(origin=Fetcher)
//!          └─► FetchController::fetch(key)   (dedup'd, write-through)
//!                 each Data(origin=Fetcher) also fills the cache
//! ```
//!
//! ## Rules
//! - `stream()` never fails as a stream; failures arrive as `Error`
//!   responses.
//! - `get`/`fresh` are single-value extractions and may return the
//!   underlying error to the caller.
//! - Timeouts are the caller's responsibility, layered above these calls.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::ready;
use futures::stream::{self, BoxStream};
use futures::StreamExt;

use crate::controller::FetchController;
use crate::error::StoreError;
use crate::fetch::FetcherRef;
use crate::response::{ResponseOrigin, StoreResponse};

use super::builder::StoreBuilder;
use super::cache::MemoryCache;
use super::request::StoreRequest;
use super::source_of_truth::SourceOfTruth;

struct StoreInner<K, V> {
    controller: FetchController<K, V>,
    cache: Option<MemoryCache<K, V>>,
    source_of_truth: Option<Arc<dyn SourceOfTruth<K, V>>>,
}

/// Keyed, deduplicating, write-through caching store.
///
/// Cheap to clone; all clones share the same engine and cache.
pub struct Store<K, V> {
    inner: Arc<StoreInner<K, V>>,
}

impl<K, V> Clone for Store<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Store<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Starts building a store around `fetcher`.
    pub fn from_fetcher(fetcher: FetcherRef<K, V>) -> StoreBuilder<K, V> {
        StoreBuilder::new(fetcher)
    }

    pub(crate) fn assemble(
        controller: FetchController<K, V>,
        cache: Option<MemoryCache<K, V>>,
        source_of_truth: Option<Arc<dyn SourceOfTruth<K, V>>>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                controller,
                cache,
                source_of_truth,
            }),
        }
    }

    /// Streams tagged responses for `request` (see module docs for the
    /// layer order). The stream is lazy and never fails.
    pub fn stream(&self, request: StoreRequest<K>) -> BoxStream<'static, StoreResponse<V>> {
        let inner = Arc::clone(&self.inner);
        stream::once(async move { inner.open(request).await })
            .flatten()
            .boxed()
    }

    /// Returns the value for `key`, preferring cache and source of truth,
    /// falling back to a dedup'd fetch.
    pub async fn get(&self, key: K) -> Result<V, StoreError> {
        self.first_value(self.stream(StoreRequest::cached(key))).await
    }

    /// Returns a fresh value for `key`, always forcing a (dedup'd) fetch.
    pub async fn fresh(&self, key: K) -> Result<V, StoreError> {
        self.first_value(self.stream(StoreRequest::fresh(key))).await
    }

    /// Evicts `key` from the memory cache and the source of truth.
    pub async fn clear(&self, key: &K) {
        if let Some(cache) = &self.inner.cache {
            cache.invalidate(key).await;
        }
        if let Some(sot) = &self.inner.source_of_truth {
            sot.delete(key).await;
        }
    }

    /// Evicts everything from the memory cache and the source of truth.
    pub async fn clear_all(&self) {
        if let Some(cache) = &self.inner.cache {
            cache.invalidate_all();
        }
        if let Some(sot) = &self.inner.source_of_truth {
            sot.delete_all().await;
        }
    }

    /// Number of keys with an active fetch engine (diagnostic).
    pub async fn fetcher_count(&self) -> usize {
        self.inner.controller.fetcher_count().await
    }

    /// Extracts the first non-loading response.
    async fn first_value(
        &self,
        mut responses: BoxStream<'static, StoreResponse<V>>,
    ) -> Result<V, StoreError> {
        while let Some(response) = responses.next().await {
            if response.is_loading() {
                continue;
            }
            return response.require_value();
        }
        Err(StoreError::MissingValue)
    }
}

impl<K, V> StoreInner<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Resolves which layer serves `request` and opens the response stream.
    async fn open(
        self: Arc<Self>,
        request: StoreRequest<K>,
    ) -> BoxStream<'static, StoreResponse<V>> {
        let StoreRequest {
            key,
            refresh,
            use_cache,
        } = request;

        if !refresh {
            if use_cache {
                if let Some(cache) = &self.cache {
                    if let Some(value) = cache.get(&key).await {
                        return stream::once(ready(StoreResponse::data(
                            value,
                            ResponseOrigin::Cache,
                        )))
                        .boxed();
                    }
                }
            }
            if let Some(sot) = &self.source_of_truth {
                if let Some(value) = sot.read(&key).await {
                    if let Some(cache) = &self.cache {
                        cache.insert(key.clone(), value.clone()).await;
                    }
                    return stream::once(ready(StoreResponse::data(
                        value,
                        ResponseOrigin::SourceOfTruth,
                    )))
                    .boxed();
                }
            }
        }

        let cache = self.cache.clone();
        let fill_key = key.clone();
        let fetched = self.controller.fetch(key).then(move |response| {
            let cache = cache.clone();
            let key = fill_key.clone();
            async move {
                if let StoreResponse::Data { value, origin } = &response {
                    if *origin == ResponseOrigin::Fetcher {
                        if let Some(cache) = &cache {
                            cache.insert(key, value.clone()).await;
                        }
                    }
                }
                response
            }
        });

        stream::once(ready(StoreResponse::loading(ResponseOrigin::Fetcher)))
            .chain(fetched)
            .boxed()
    }
}
