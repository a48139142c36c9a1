//! # FetchController: per-key dedup'd, write-through fetch streams.
//!
//! ## Architecture
//! ```text
//! fetch(key) ──► RefcountRegistry::acquire(key)
//!                    │ first caller: factory builds the key's engine
//!                    ▼
//!              Multicaster<StoreResponse<V>>
//!                    │ source  = fetcher.stream(key)
//!                    │            Ok(v)  → Data(v, Fetcher)
//!                    │            Err(e) → Error(e, Fetcher), then complete
//!                    │ on_each = write-through to the source of truth
//!                    ▼
//!              Subscription ──► FetchStream (released on drop)
//! ```
//!
//! ## Rules
//! - N concurrent `fetch(key)` calls before completion share exactly ONE
//!   fetcher invocation; each caller observes the same tagged responses
//!   from its own attachment point.
//! - The tagged-response stream never fails: upstream failure is one
//!   terminal `Error(origin=Fetcher)` value.
//! - A failing write-through becomes `Error(origin=SourceOfTruth)`,
//!   dispatched in place of that `Data` item; production continues with the
//!   remaining upstream items.
//! - Piggyback is enabled exactly when no writer is configured: the engine
//!   is then the only replay mechanism for late subscribers.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tracing::warn;

use crate::error::FetchError;
use crate::fetch::FetcherRef;
use crate::multicast::{Multicaster, OnEach, SourceFn};
use crate::registry::RefcountRegistry;
use crate::response::{ResponseOrigin, StoreResponse};

use super::stream::FetchStream;

/// Write-through seam: persists one fetched item for a key.
pub type SourceWriter<K, V> =
    Arc<dyn Fn(K, V) -> BoxFuture<'static, Result<(), FetchError>> + Send + Sync>;

pub(crate) type EngineRef<V> = Arc<Multicaster<StoreResponse<V>>>;

pub(crate) struct Inner<K, V> {
    pub(crate) fetcher: FetcherRef<K, V>,
    pub(crate) writer: Option<SourceWriter<K, V>>,
    pub(crate) piggyback: bool,
    pub(crate) registry: Arc<RefcountRegistry<K, EngineRef<V>>>,
}

/// Guarantees at most one in-flight fetch per key, with write-through.
pub struct FetchController<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for FetchController<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> FetchController<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Creates a controller around `fetcher`.
    ///
    /// Piggyback mode is derived from the writer: with no source of truth
    /// the engine substitutes as the only replay mechanism, so late
    /// subscribers must be able to join a running production.
    pub fn new(fetcher: FetcherRef<K, V>, writer: Option<SourceWriter<K, V>>) -> Self {
        let piggyback = writer.is_none();
        let registry = Arc::new(RefcountRegistry::new(|engine: EngineRef<V>| async move {
            engine.close().await;
        }));
        Self {
            inner: Arc::new(Inner {
                fetcher,
                writer,
                piggyback,
                registry,
            }),
        }
    }

    /// Returns the lazy tagged-response stream for `key`.
    ///
    /// Nothing happens until the stream is polled: the first poll acquires
    /// (or reuses) the key's engine from the registry; dropping the stream
    /// releases the reference, and the last release tears the engine down,
    /// cancelling the in-flight fetch.
    pub fn fetch(&self, key: K) -> FetchStream<K, V> {
        FetchStream::new(Arc::clone(&self.inner), key)
    }

    /// Number of keys with a currently active engine instance (diagnostic).
    pub async fn fetcher_count(&self) -> usize {
        self.inner.registry.len().await
    }
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Builds the multicast engine for one key.
    pub(crate) fn make_engine(&self, key: &K) -> EngineRef<V> {
        let source = self.tagged_source(key);
        let on_each = self.write_through_hook(key);
        Arc::new(Multicaster::new(source, 0, self.piggyback, on_each))
    }

    /// Wraps the fetcher stream so that it never fails:
    /// `Ok` items become `Data(origin=Fetcher)`, the first `Err` becomes a
    /// single terminal `Error(origin=Fetcher)`.
    fn tagged_source(&self, key: &K) -> SourceFn<StoreResponse<V>> {
        let fetcher = Arc::clone(&self.fetcher);
        let key = key.clone();
        Arc::new(move || {
            fetcher
                .stream(&key)
                .map(|result| match result {
                    Ok(value) => StoreResponse::data(value, ResponseOrigin::Fetcher),
                    Err(error) => StoreResponse::Error {
                        error,
                        origin: ResponseOrigin::Fetcher,
                    },
                })
                .scan(false, |errored, response| {
                    if *errored {
                        return futures::future::ready(None);
                    }
                    *errored = response.is_error();
                    futures::future::ready(Some(response))
                })
                .boxed()
        })
    }

    /// The engine's `on_each` hook: write each `Data` value through before
    /// fan-out. A failing write substitutes an `Error(origin=SourceOfTruth)`
    /// for that item.
    fn write_through_hook(&self, key: &K) -> OnEach<StoreResponse<V>> {
        let Some(writer) = self.writer.clone() else {
            return crate::multicast::passthrough();
        };
        let key = key.clone();
        Arc::new(move |response| {
            let writer = Arc::clone(&writer);
            let key = key.clone();
            async move {
                match response {
                    StoreResponse::Data { value, origin } => {
                        match (writer)(key, value.clone()).await {
                            Ok(()) => StoreResponse::Data { value, origin },
                            Err(error) => {
                                warn!(error = %error, "write-through failed");
                                StoreResponse::Error {
                                    error,
                                    origin: ResponseOrigin::SourceOfTruth,
                                }
                            }
                        }
                    }
                    other => other,
                }
            }
            .boxed()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchFn, FetchStreamFn};
    use futures::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;
    use tokio::time::sleep;

    fn counting_fetcher(
        invocations: Arc<AtomicUsize>,
        delay: Duration,
    ) -> FetcherRef<String, u32> {
        FetchFn::arc(move |_key: String| {
            let invocations = invocations.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                sleep(delay).await;
                Ok(42)
            }
        })
    }

    async fn wait_for_zero_fetchers(controller: &FetchController<String, u32>) {
        for _ in 0..100 {
            if controller.fetcher_count().await == 0 {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("engine was not released");
    }

    #[tokio::test]
    async fn concurrent_fetches_share_one_invocation() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let controller = FetchController::new(
            counting_fetcher(invocations.clone(), Duration::from_millis(50)),
            None,
        );

        let (a, b, c) = tokio::join!(
            controller.fetch("k".to_string()).collect::<Vec<_>>(),
            controller.fetch("k".to_string()).collect::<Vec<_>>(),
            controller.fetch("k".to_string()).collect::<Vec<_>>(),
        );

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(a, vec![StoreResponse::data(42, ResponseOrigin::Fetcher)]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        wait_for_zero_fetchers(&controller).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn ready_fetcher_items_all_reach_the_first_caller() {
        for _ in 0..500 {
            let fetcher: FetcherRef<String, u32> = FetchStreamFn::arc(|_key: String| {
                stream::iter([Ok(1), Ok(2), Ok(3)]).boxed()
            });
            let controller = FetchController::new(fetcher, None);

            let responses = controller.fetch("k".to_string()).collect::<Vec<_>>().await;
            assert_eq!(
                responses,
                vec![
                    StoreResponse::data(1, ResponseOrigin::Fetcher),
                    StoreResponse::data(2, ResponseOrigin::Fetcher),
                    StoreResponse::data(3, ResponseOrigin::Fetcher),
                ]
            );
        }
    }

    #[tokio::test]
    async fn distinct_keys_fetch_independently() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let controller = FetchController::new(
            counting_fetcher(invocations.clone(), Duration::from_millis(10)),
            None,
        );

        let (a, b) = tokio::join!(
            controller.fetch("left".to_string()).collect::<Vec<_>>(),
            controller.fetch("right".to_string()).collect::<Vec<_>>(),
        );
        assert_eq!(invocations.load(Ordering::SeqCst), 2);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn upstream_failure_becomes_one_terminal_error_response() {
        let fetcher: FetcherRef<String, u32> =
            FetchFn::arc(|_key: String| async move { Err(FetchError::new("backend down")) });
        let controller = FetchController::new(fetcher, None);

        let responses = controller.fetch("k".to_string()).collect::<Vec<_>>().await;
        assert_eq!(
            responses,
            vec![StoreResponse::error("backend down", ResponseOrigin::Fetcher)]
        );
    }

    #[tokio::test]
    async fn stream_completes_after_mid_stream_error() {
        let fetcher: FetcherRef<String, u32> = FetchStreamFn::arc(|_key: String| {
            stream::iter(vec![Ok(1), Err(FetchError::new("cut off")), Ok(2)]).boxed()
        });
        let controller = FetchController::new(fetcher, None);

        let responses = controller.fetch("k".to_string()).collect::<Vec<_>>().await;
        assert_eq!(
            responses,
            vec![
                StoreResponse::data(1, ResponseOrigin::Fetcher),
                StoreResponse::error("cut off", ResponseOrigin::Fetcher),
            ]
        );
    }

    #[tokio::test]
    async fn write_through_happens_before_delivery() {
        let log: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));

        let fetcher: FetcherRef<String, u32> = FetchStreamFn::arc(|_key: String| {
            stream::iter(vec![Ok(1), Ok(2), Ok(3)]).boxed()
        });
        let writer_log = log.clone();
        let writer: SourceWriter<String, u32> = Arc::new(move |_key, value| {
            let writer_log = writer_log.clone();
            async move {
                writer_log.lock().unwrap().push(format!("write:{value}"));
                Ok(())
            }
            .boxed()
        });
        let controller = FetchController::new(fetcher, Some(writer));

        let mut stream = controller.fetch("k".to_string());
        while let Some(response) = stream.next().await {
            if let Some(value) = response.value() {
                log.lock().unwrap().push(format!("deliver:{value}"));
            }
        }

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "write:1",
                "deliver:1",
                "write:2",
                "deliver:2",
                "write:3",
                "deliver:3"
            ]
        );
    }

    #[tokio::test]
    async fn failed_write_substitutes_source_of_truth_error() {
        let fetcher: FetcherRef<String, u32> = FetchStreamFn::arc(|_key: String| {
            stream::iter(vec![Ok(1), Ok(2), Ok(3)]).boxed()
        });
        let writer: SourceWriter<String, u32> = Arc::new(|_key, value| {
            async move {
                if value == 2 {
                    Err(FetchError::new("disk full"))
                } else {
                    Ok(())
                }
            }
            .boxed()
        });
        let controller = FetchController::new(fetcher, Some(writer));

        let responses = controller.fetch("k".to_string()).collect::<Vec<_>>().await;
        assert_eq!(
            responses,
            vec![
                StoreResponse::data(1, ResponseOrigin::Fetcher),
                StoreResponse::error("disk full", ResponseOrigin::SourceOfTruth),
                StoreResponse::data(3, ResponseOrigin::Fetcher),
            ]
        );
    }

    #[tokio::test]
    async fn dropping_the_stream_releases_the_engine() {
        let invocations = Arc::new(AtomicUsize::new(0));
        let controller = FetchController::new(
            counting_fetcher(invocations.clone(), Duration::from_secs(30)),
            None,
        );

        let mut stream = controller.fetch("k".to_string());
        // First poll acquires the engine; the fetch itself hangs for 30s.
        let pending =
            tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(pending.is_err());
        assert_eq!(controller.fetcher_count().await, 1);

        drop(stream);
        wait_for_zero_fetchers(&controller).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
    }
}
