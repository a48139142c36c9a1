//! # Function-backed fetchers (`FetchFn`, `FetchStreamFn`)
//!
//! [`FetchFn`] wraps a closure `F: Fn(K) -> Fut`, producing a fresh future per
//! fetch: the common single-shot case (one request, one value).
//! [`FetchStreamFn`] wraps a closure returning a whole stream, for
//! multi-item upstreams.
//!
//! Each call creates a **new** future/stream owning its own state; shared
//! state belongs in an explicit `Arc<...>` inside the closure.

use std::future::Future;
use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};

use crate::error::FetchError;
use crate::fetch::fetcher::Fetcher;

/// Single-shot, function-backed fetcher.
///
/// Wraps a closure that *creates* a new future per fetch.
pub struct FetchFn<F> {
    f: F,
}

impl<F> FetchFn<F> {
    /// Creates a new single-shot fetcher.
    ///
    /// Prefer [`FetchFn::arc`] when you immediately need a
    /// [`FetcherRef`](crate::FetcherRef).
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the fetcher and returns it as a shared handle.
    ///
    /// ## Example
    /// ```
    /// use storecast::{FetchError, FetchFn, FetcherRef};
    ///
    /// let f: FetcherRef<String, String> = FetchFn::arc(|key: String| async move {
    ///     Ok::<_, FetchError>(format!("value-for-{key}"))
    /// });
    /// ```
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<K, T, F, Fut> Fetcher<K, T> for FetchFn<F>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(K) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn stream(&self, key: &K) -> BoxStream<'static, Result<T, FetchError>> {
        let fut = (self.f)(key.clone());
        stream::once(fut).boxed()
    }
}

/// Streaming, function-backed fetcher.
///
/// Wraps a closure that returns a fresh stream of values per fetch.
pub struct FetchStreamFn<F> {
    f: F,
}

impl<F> FetchStreamFn<F> {
    /// Creates a new streaming fetcher.
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Creates the fetcher and returns it as a shared handle.
    pub fn arc(f: F) -> Arc<Self> {
        Arc::new(Self::new(f))
    }
}

impl<K, T, F> Fetcher<K, T> for FetchStreamFn<F>
where
    K: Clone + Send + Sync + 'static,
    T: Send + 'static,
    F: Fn(K) -> BoxStream<'static, Result<T, FetchError>> + Send + Sync + 'static,
{
    fn stream(&self, key: &K) -> BoxStream<'static, Result<T, FetchError>> {
        (self.f)(key.clone())
    }
}
