//! # Per-call cache directives.
//!
//! A [`StoreRequest`] tells `stream()` which layers to consult before
//! falling back to a fetch.

/// Cache directives for one `stream()` call.
#[derive(Debug, Clone)]
pub struct StoreRequest<K> {
    /// Key to load.
    pub key: K,
    /// Skip all local reads and force an (in-flight-dedup'd) fetch.
    pub refresh: bool,
    /// Consult the memory cache. The source of truth is read regardless,
    /// unless `refresh` is set.
    pub use_cache: bool,
}

impl<K> StoreRequest<K> {
    /// Serve from cache or source of truth when possible; fetch on miss.
    pub fn cached(key: K) -> Self {
        Self {
            key,
            refresh: false,
            use_cache: true,
        }
    }

    /// Force a fetch, skipping cache and source-of-truth reads.
    pub fn fresh(key: K) -> Self {
        Self {
            key,
            refresh: true,
            use_cache: false,
        }
    }

    /// Skip the memory cache but still consult the source of truth.
    pub fn skip_cache(key: K) -> Self {
        Self {
            key,
            refresh: false,
            use_cache: false,
        }
    }
}
