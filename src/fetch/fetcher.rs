//! # Fetcher trait: the upstream data source.
//!
//! A [`Fetcher`] turns a key into a stream of values, typically over a
//! network. The stream may be single-shot (one value then completion) or
//! long-lived (server-sent updates). Failures surface as `Err` items; the
//! fetch controller converts the first failure into a terminal
//! `Error(origin=Fetcher)` response, so a fetcher never crashes a store.

use std::sync::Arc;

use futures::stream::BoxStream;

use crate::error::FetchError;

/// Shared reference to a fetcher.
pub type FetcherRef<K, T> = Arc<dyn Fetcher<K, T>>;

/// # Upstream data source for a store.
///
/// Implementors return a fresh stream per call; each call corresponds to one
/// upstream round-trip (the fetch controller guarantees at most one in flight
/// per key).
///
/// # Example
/// ```
/// use futures::stream::{self, BoxStream, StreamExt};
/// use storecast::{FetchError, Fetcher};
///
/// struct PageFetcher;
///
/// impl Fetcher<String, String> for PageFetcher {
///     fn stream(&self, key: &String) -> BoxStream<'static, Result<String, FetchError>> {
///         let key = key.clone();
///         stream::once(async move { Ok(format!("page:{key}")) }).boxed()
///     }
/// }
/// ```
pub trait Fetcher<K, T>: Send + Sync + 'static {
    /// Starts one upstream fetch for `key`.
    ///
    /// The returned stream owns everything it needs (`'static`); the engine
    /// may drop it mid-flight on teardown, which must cancel the underlying
    /// request.
    fn stream(&self, key: &K) -> BoxStream<'static, Result<T, FetchError>>;
}
