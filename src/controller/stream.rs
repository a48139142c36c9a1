//! # FetchStream: lazy acquire-on-first-poll response stream.
//!
//! The stream returned by [`FetchController::fetch`]. Its lifecycle:
//!
//! ```text
//! Idle ──first poll──► Acquiring ──► Streaming ──completion/drop──► Done
//!        registry.acquire + engine.subscribe        registry.release
//! ```
//!
//! ## Rules
//! - Nothing is acquired until the consumer polls; an unpolled stream costs
//!   nothing and holds no references.
//! - The registry reference is released exactly once, on completion or drop,
//!   whichever comes first.
//! - Normal completion releases **inline**, before the stream reports its
//!   end: a follow-up fetch for the same key then gets a fresh engine
//!   rather than the terminal one.
//! - A mid-stream `Drop` decrements synchronously (non-blocking registry
//!   path) and spawns only the engine teardown; outside a runtime the
//!   engine leaks, which is logged loudly.
//!
//! [`FetchController::fetch`]: super::FetchController::fetch

use std::fmt;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::future::BoxFuture;
use futures::{FutureExt, Stream};
use tracing::{error, warn};

use crate::multicast::Subscription;
use crate::registry::{RefcountRegistry, TryRelease};
use crate::response::StoreResponse;

use super::fetch_controller::{EngineRef, Inner};

/// Releases the registry reference for one `fetch()` call, exactly once.
struct ReleaseGuard<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    key: Option<K>,
    registry: Arc<RefcountRegistry<K, EngineRef<V>>>,
}

impl<K, V> ReleaseGuard<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Takes the release out of the guard as a future, leaving the guard's
    /// `Drop` a no-op. Used on normal completion to release inline.
    fn disarm(&mut self) -> Option<BoxFuture<'static, ()>> {
        let key = self.key.take()?;
        let registry = Arc::clone(&self.registry);
        Some(Box::pin(async move {
            if let Err(err) = registry.release(&key).await {
                error!(error = %err, "fetch stream release failed");
            }
        }))
    }
}

impl<K, V> Drop for ReleaseGuard<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    fn drop(&mut self) {
        let Some(key) = self.key.take() else { return };
        match self.registry.try_release(&key) {
            Some(Ok(TryRelease::Released)) => {}
            Some(Ok(TryRelease::Destroy(teardown))) => {
                // The entry is already gone from the registry; a follow-up
                // fetch for this key gets a fresh engine while this one
                // shuts down in the background.
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(teardown);
                    }
                    Err(_) => {
                        warn!(?key, "fetch stream dropped outside a runtime; engine leaked");
                    }
                }
            }
            Some(Err(err)) => {
                // Unreachable by construction: the guard releases a
                // reference it acquired. Surface it anyway.
                error!(error = %err, "fetch stream release failed");
            }
            None => {
                // Registry lock contended; fall back to an async release.
                let registry = Arc::clone(&self.registry);
                match tokio::runtime::Handle::try_current() {
                    Ok(handle) => {
                        handle.spawn(async move {
                            if let Err(err) = registry.release(&key).await {
                                error!(error = %err, "fetch stream release failed");
                            }
                        });
                    }
                    Err(_) => {
                        warn!(?key, "fetch stream dropped outside a runtime; engine leaked");
                    }
                }
            }
        }
    }
}

struct Active<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    subscription: Subscription<StoreResponse<V>>,
    _release: ReleaseGuard<K, V>,
}

enum State<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    Idle {
        key: K,
        inner: Arc<Inner<K, V>>,
    },
    Acquiring(BoxFuture<'static, Active<K, V>>),
    Streaming(Active<K, V>),
    Releasing(BoxFuture<'static, ()>),
    Done,
}

/// Lazy stream of tagged responses for one key (see module docs).
pub struct FetchStream<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    state: State<K, V>,
}

impl<K, V> FetchStream<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(inner: Arc<Inner<K, V>>, key: K) -> Self {
        Self {
            state: State::Idle { key, inner },
        }
    }
}

// Nothing in here is structurally pinned: `poll_next` replaces `state`
// wholesale and the inner futures are already boxed. The auto-impl is
// conditional on `K: Unpin`, which callers should not have to provide.
impl<K, V> Unpin for FetchStream<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
}

/// Acquires the key's engine and attaches a subscription.
async fn attach<K, V>(inner: Arc<Inner<K, V>>, key: K) -> Active<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let engine = inner
        .registry
        .acquire(key.clone(), || inner.make_engine(&key))
        .await;
    // Guard up before the next await point: dropping this future mid-attach
    // must still release the reference just acquired.
    let release = ReleaseGuard {
        key: Some(key),
        registry: Arc::clone(&inner.registry),
    };
    let subscription = engine.subscribe().await;
    Active {
        subscription,
        _release: release,
    }
}

impl<K, V> Stream for FetchStream<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    type Item = StoreResponse<V>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match std::mem::replace(&mut this.state, State::Done) {
                State::Idle { key, inner } => {
                    this.state = State::Acquiring(Box::pin(attach(inner, key)));
                }
                State::Acquiring(mut fut) => match fut.poll_unpin(cx) {
                    Poll::Ready(active) => this.state = State::Streaming(active),
                    Poll::Pending => {
                        this.state = State::Acquiring(fut);
                        return Poll::Pending;
                    }
                },
                State::Streaming(mut active) => {
                    match Pin::new(&mut active.subscription).poll_next(cx) {
                        Poll::Ready(Some(response)) => {
                            this.state = State::Streaming(active);
                            return Poll::Ready(Some(response));
                        }
                        Poll::Ready(None) => {
                            // Release inline on normal completion: by the
                            // time the consumer observes the end of the
                            // stream, the reference is gone and a follow-up
                            // fetch gets a fresh engine instead of this
                            // terminal one.
                            if let Some(fut) = active._release.disarm() {
                                this.state = State::Releasing(fut);
                            }
                        }
                        Poll::Pending => {
                            this.state = State::Streaming(active);
                            return Poll::Pending;
                        }
                    }
                }
                State::Releasing(mut fut) => match fut.poll_unpin(cx) {
                    Poll::Ready(()) => return Poll::Ready(None),
                    Poll::Pending => {
                        this.state = State::Releasing(fut);
                        return Poll::Pending;
                    }
                },
                State::Done => return Poll::Ready(None),
            }
        }
    }
}
