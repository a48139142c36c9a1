//! # StoreBuilder: assembles a store from its collaborators.
//!
//! Starts from a fetcher ([`Store::from_fetcher`](super::Store::from_fetcher)),
//! optionally adds a source of truth and a cache policy, then wires the
//! fetch controller together in `build()`.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::FutureExt;

use crate::controller::{FetchController, SourceWriter};
use crate::fetch::FetcherRef;

use super::cache::{CachePolicy, MemoryCache};
use super::source_of_truth::SourceOfTruth;
use super::store::Store;

/// Builder for a [`Store`].
pub struct StoreBuilder<K, V> {
    fetcher: FetcherRef<K, V>,
    source_of_truth: Option<Arc<dyn SourceOfTruth<K, V>>>,
    cache_policy: CachePolicy,
    cache_enabled: bool,
}

impl<K, V> StoreBuilder<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(fetcher: FetcherRef<K, V>) -> Self {
        Self {
            fetcher,
            source_of_truth: None,
            cache_policy: CachePolicy::default(),
            cache_enabled: true,
        }
    }

    /// Adds a durable source of truth.
    ///
    /// Fetched values are written through to it before delivery, reads
    /// serve `Data(origin=SourceOfTruth)` responses, and the multicast
    /// engine's piggyback mode turns off (the source of truth becomes the
    /// replay mechanism for late consumers).
    pub fn with_source_of_truth(mut self, source_of_truth: Arc<dyn SourceOfTruth<K, V>>) -> Self {
        self.source_of_truth = Some(source_of_truth);
        self
    }

    /// Overrides the memory cache policy.
    pub fn with_cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Disables the memory cache entirely.
    pub fn disable_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Builds the store.
    pub fn build(self) -> Store<K, V> {
        let writer: Option<SourceWriter<K, V>> = self.source_of_truth.as_ref().map(|sot| {
            let sot = Arc::clone(sot);
            let writer: SourceWriter<K, V> = Arc::new(move |key: K, value: V| {
                let sot = Arc::clone(&sot);
                async move { sot.write(&key, value).await }.boxed()
            });
            writer
        });

        let controller = FetchController::new(self.fetcher, writer);
        let cache = self
            .cache_enabled
            .then(|| MemoryCache::new(self.cache_policy));
        Store::assemble(controller, cache, self.source_of_truth)
    }
}
