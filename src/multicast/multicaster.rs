//! # Multicaster: the per-key engine handle.
//!
//! Owns the source factory, the `on_each` hook, and the lazily-started
//! coordinator/producer pair. Construction is cheap; nothing runs until the
//! first [`subscribe`](Multicaster::subscribe).
//!
//! ## Rules
//! - Startup is one-time and idempotent (mutex-guarded check-and-set);
//!   concurrent first subscribers race on the lock, exactly one starts the
//!   tasks.
//! - `close()` completes all attached subscriptions, cancels the producer's
//!   outstanding upstream pull, and awaits both tasks. A closed engine hands
//!   empty subscriptions to late callers.
//! - `buffer_size` is the replay window for late subscribers: the most
//!   recent N items are re-delivered on attach (0 = no replay). Replayed
//!   items never gate the producer.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::coordinator::{coordinate, Command};
use super::producer::produce;
use super::subscription::Subscription;

/// Factory for the upstream source; invoked once, at producer startup.
pub type SourceFn<T> = Arc<dyn Fn() -> BoxStream<'static, T> + Send + Sync>;

/// Side-effect hook run once per item before fan-out; may replace the item.
pub type OnEach<T> = Arc<dyn Fn(T) -> BoxFuture<'static, T> + Send + Sync>;

enum EngineState<T> {
    Idle,
    Running(Running<T>),
    Closed,
}

struct Running<T> {
    commands: mpsc::UnboundedSender<Command<T>>,
    cancel: CancellationToken,
    producer: JoinHandle<()>,
    coordinator: JoinHandle<()>,
}

/// Per-key multicast engine: one producer, N ordered subscribers.
pub struct Multicaster<T> {
    source: SourceFn<T>,
    on_each: OnEach<T>,
    piggyback: bool,
    buffer_size: usize,
    next_id: AtomicU64,
    state: Mutex<EngineState<T>>,
}

impl<T: Clone + Send + 'static> Multicaster<T> {
    /// Creates an engine around `source`.
    ///
    /// ### Parameters
    /// - `source`: factory for the upstream stream (invoked on first subscribe)
    /// - `buffer_size`: replay window for late subscribers (0 = none)
    /// - `piggyback`: keep the producer alive across empty-subscriber windows
    ///   so late subscribers can join the same run
    /// - `on_each`: per-item hook applied before fan-out (write-through seam)
    pub fn new(source: SourceFn<T>, buffer_size: usize, piggyback: bool, on_each: OnEach<T>) -> Self {
        Self {
            source,
            on_each,
            piggyback,
            buffer_size,
            next_id: AtomicU64::new(0),
            state: Mutex::new(EngineState::Idle),
        }
    }

    /// Whether late subscribers join the running production.
    pub fn piggyback(&self) -> bool {
        self.piggyback
    }

    /// Attaches a new subscriber, starting the engine on first use.
    ///
    /// When this returns, the subscriber is in the coordinator's set: every
    /// item dispatched afterwards reaches it, in production order. Items
    /// dispatched before attachment are only seen through the replay window.
    pub async fn subscribe(&self) -> Subscription<T> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let (attached_tx, attached_rx) = oneshot::channel();
        let attach = Command::Attach {
            id,
            tx,
            attached: attached_tx,
        };

        let commands = {
            let mut state = self.state.lock().await;
            match &*state {
                EngineState::Running(running) => {
                    let commands = running.commands.clone();
                    let _ = commands.send(attach);
                    commands
                }
                EngineState::Closed => return Subscription::completed(),
                EngineState::Idle => {
                    let running = self.start(attach);
                    let commands = running.commands.clone();
                    *state = EngineState::Running(running);
                    commands
                }
            }
        };

        // Wait until the coordinator has the subscriber in its set,
        // otherwise "from attachment onward" would be a race.
        let _ = attached_rx.await;
        Subscription::new(rx, id, commands)
    }

    /// Spawns the coordinator and producer tasks.
    ///
    /// `first_attach` enters the command queue before the producer task
    /// exists: even an immediately-ready upstream cannot dispatch ahead of
    /// the subscriber that started the engine.
    fn start(&self, first_attach: Command<T>) -> Running<T> {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let coordinator = tokio::spawn(coordinate(
            commands_rx,
            self.piggyback,
            self.buffer_size,
            cancel.clone(),
        ));
        let _ = commands_tx.send(first_attach);
        let upstream = (self.source)();
        let producer = tokio::spawn(produce(
            upstream,
            self.on_each.clone(),
            commands_tx.clone(),
            cancel.clone(),
        ));

        debug!(piggyback = self.piggyback, "multicaster: started");
        Running {
            commands: commands_tx,
            cancel,
            producer,
            coordinator,
        }
    }

    /// Terminates the engine immediately.
    ///
    /// Completes all attached subscriptions, cancels the producer (dropping
    /// its outstanding upstream pull), and awaits both tasks. Idempotent.
    pub async fn close(&self) {
        let running = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, EngineState::Closed) {
                EngineState::Running(running) => Some(running),
                _ => None,
            }
        };
        let Some(running) = running else { return };

        running.cancel.cancel();
        let _ = running.commands.send(Command::Close);
        let _ = running.producer.await;
        let _ = running.coordinator.await;
        debug!("multicaster: closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multicast::passthrough;
    use futures::stream::StreamExt;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// A source backed by an mpsc channel the test feeds by hand.
    fn channel_source<T: Send + 'static>() -> (mpsc::Sender<T>, SourceFn<T>) {
        let (tx, rx) = mpsc::channel::<T>(16);
        let stash = Arc::new(StdMutex::new(Some(rx)));
        let source: SourceFn<T> = Arc::new(move || {
            let mut rx = stash
                .lock()
                .unwrap()
                .take()
                .expect("source started more than once");
            futures::stream::poll_fn(move |cx| rx.poll_recv(cx)).boxed()
        });
        (tx, source)
    }

    #[tokio::test]
    async fn fan_out_preserves_production_order_for_all_subscribers() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 0, true, passthrough());

        let sub1 = engine.subscribe().await;
        let sub2 = engine.subscribe().await;

        for item in [1, 2, 3] {
            tx.send(item).await.unwrap();
        }
        drop(tx);

        assert_eq!(sub1.collect::<Vec<_>>().await, vec![1, 2, 3]);
        assert_eq!(sub2.collect::<Vec<_>>().await, vec![1, 2, 3]);
        engine.close().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn first_subscriber_sees_every_item_of_a_ready_source() {
        // A source that is ready before the subscriber's queue exists must
        // not dispatch past it; repeat to shake out scheduling orders.
        for _ in 0..500 {
            let source: SourceFn<u32> =
                Arc::new(|| futures::stream::iter([1, 2, 3]).boxed());
            let engine = Multicaster::new(source, 0, true, passthrough());
            let sub = engine.subscribe().await;
            assert_eq!(sub.collect::<Vec<_>>().await, vec![1, 2, 3]);
            engine.close().await;
        }
    }

    #[tokio::test]
    async fn late_subscriber_piggybacks_on_running_production() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 0, true, passthrough());

        let mut sub1 = engine.subscribe().await;
        tx.send(1).await.unwrap();
        assert_eq!(sub1.next().await, Some(1));

        // Attach after the first item was consumed; same run, no restart.
        let sub2 = engine.subscribe().await;
        tx.send(2).await.unwrap();
        tx.send(3).await.unwrap();
        drop(tx);

        assert_eq!(sub1.collect::<Vec<_>>().await, vec![2, 3]);
        assert_eq!(sub2.collect::<Vec<_>>().await, vec![2, 3]);
        engine.close().await;
    }

    #[tokio::test]
    async fn replay_window_redelivers_recent_items_on_attach() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 2, true, passthrough());

        let mut sub1 = engine.subscribe().await;
        for item in [1, 2, 3] {
            tx.send(item).await.unwrap();
            assert_eq!(sub1.next().await, Some(item));
        }

        let sub2 = engine.subscribe().await;
        drop(tx);
        // Only the last two items fit the window.
        assert_eq!(sub2.collect::<Vec<_>>().await, vec![2, 3]);
        engine.close().await;
    }

    #[tokio::test]
    async fn on_each_runs_before_any_delivery() {
        let log: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let (tx, source) = channel_source::<u32>();

        let hook_log = log.clone();
        let on_each: OnEach<u32> = Arc::new(move |item| {
            let hook_log = hook_log.clone();
            Box::pin(async move {
                hook_log.lock().unwrap().push(format!("each:{item}"));
                item + 10
            })
        });
        let engine = Multicaster::new(source, 0, true, on_each);
        let mut sub = engine.subscribe().await;

        for item in [1, 2] {
            tx.send(item).await.unwrap();
            let got = sub.next().await.unwrap();
            log.lock().unwrap().push(format!("recv:{got}"));
        }
        drop(tx);

        assert_eq!(
            *log.lock().unwrap(),
            vec!["each:1", "recv:11", "each:2", "recv:12"]
        );
        engine.close().await;
    }

    #[tokio::test]
    async fn close_completes_all_subscriptions() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 0, true, passthrough());
        let sub = engine.subscribe().await;

        engine.close().await;
        assert_eq!(sub.collect::<Vec<_>>().await, Vec::<u32>::new());

        // A closed engine hands out completed subscriptions.
        let late = engine.subscribe().await;
        assert_eq!(late.collect::<Vec<_>>().await, Vec::<u32>::new());
        drop(tx);
    }

    #[tokio::test]
    async fn without_piggyback_last_detach_cancels_the_producer() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 0, false, passthrough());

        let mut sub = engine.subscribe().await;
        tx.send(1).await.unwrap();
        assert_eq!(sub.next().await, Some(1));
        drop(sub);

        // The producer drops the upstream stream, which closes our channel.
        tokio::time::timeout(Duration::from_secs(1), tx.closed())
            .await
            .expect("producer should cancel after last detach");
        engine.close().await;
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_a_fast_one() {
        let (tx, source) = channel_source::<u32>();
        let engine = Multicaster::new(source, 0, true, passthrough());

        let mut fast = engine.subscribe().await;
        let slow = engine.subscribe().await;

        // `slow` never polls; its queue is unbounded and the gate only
        // needs the first ack, so `fast` keeps the producer advancing.
        for item in [1, 2, 3, 4] {
            tx.send(item).await.unwrap();
            assert_eq!(fast.next().await, Some(item));
        }
        drop(tx);
        assert_eq!(fast.next().await, None);
        assert_eq!(slow.collect::<Vec<_>>().await, vec![1, 2, 3, 4]);
        engine.close().await;
    }
}
