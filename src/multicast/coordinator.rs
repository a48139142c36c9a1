//! # Coordinator: single-owner task for the subscriber set.
//!
//! Subscriber add/remove and item fan-out are serialized through one command
//! queue read by this task, so the set is never inspected-then-modified by
//! two tasks concurrently. Attach acknowledgments travel back through a
//! oneshot, which lets `subscribe()` guarantee that every item dispatched
//! after it returns reaches the new subscriber.
//!
//! ## Rules
//! - Fan-out follows insertion order of the subscriber set.
//! - A subscriber whose queue is gone (consumer dropped) is pruned on the
//!   next dispatch.
//! - After `Complete`, the set is drained and late attaches receive an
//!   already-completed subscription.
//! - In non-piggyback mode, the set becoming empty cancels the producer:
//!   nobody is listening and no replay mechanism exists downstream.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// One item headed for one subscriber's queue, with the shared per-item ack.
pub(crate) struct Delivery<T> {
    pub(crate) item: T,
    pub(crate) ack: mpsc::Sender<()>,
}

/// Commands accepted by the coordinator task.
pub(crate) enum Command<T> {
    /// Attach a new subscriber queue; `attached` fires once it is in the set.
    Attach {
        id: u64,
        tx: mpsc::UnboundedSender<Delivery<T>>,
        attached: oneshot::Sender<()>,
    },
    /// Remove a subscriber (consumer side dropped).
    Detach { id: u64 },
    /// Fan one item out to every attached subscriber.
    Dispatch { item: T, ack: mpsc::Sender<()> },
    /// Upstream finished; complete all subscribers.
    Complete,
    /// Tear the engine down immediately.
    Close,
}

struct Slot<T> {
    id: u64,
    tx: mpsc::UnboundedSender<Delivery<T>>,
}

/// Runs the coordinator until `Close` or until every command sender is gone.
pub(crate) async fn coordinate<T: Clone + Send + 'static>(
    mut commands: mpsc::UnboundedReceiver<Command<T>>,
    piggyback: bool,
    buffer_size: usize,
    cancel: CancellationToken,
) {
    let mut subscribers: Vec<Slot<T>> = Vec::new();
    let mut replay: VecDeque<T> = VecDeque::with_capacity(buffer_size);
    let mut terminal = false;

    while let Some(cmd) = commands.recv().await {
        match cmd {
            Command::Attach { id, tx, attached } => {
                if terminal {
                    // Dropping `tx` hands the late subscriber an
                    // already-completed stream.
                    let _ = attached.send(());
                    continue;
                }
                if !replay.is_empty() {
                    // Replayed items do not gate the producer.
                    let (noop_ack, _closed) = mpsc::channel(1);
                    for item in &replay {
                        let _ = tx.send(Delivery {
                            item: item.clone(),
                            ack: noop_ack.clone(),
                        });
                    }
                }
                subscribers.push(Slot { id, tx });
                let _ = attached.send(());
            }
            Command::Detach { id } => {
                subscribers.retain(|slot| slot.id != id);
                // The attach set is the only signal here: a caller that
                // already holds a registry reference but whose Attach is
                // still queued behind this command finds the production
                // cancelled and gets a completed subscription.
                if subscribers.is_empty() && !piggyback && !terminal {
                    debug!("coordinator: last subscriber detached, cancelling producer");
                    terminal = true;
                    cancel.cancel();
                }
            }
            Command::Dispatch { item, ack } => {
                if buffer_size > 0 {
                    if replay.len() == buffer_size {
                        replay.pop_front();
                    }
                    replay.push_back(item.clone());
                }
                subscribers.retain(|slot| {
                    slot.tx
                        .send(Delivery {
                            item: item.clone(),
                            ack: ack.clone(),
                        })
                        .is_ok()
                });
                // The producer's own `ack` copy drops here; only attached
                // subscribers can now release the gate.
            }
            Command::Complete => {
                debug!("coordinator: upstream complete");
                terminal = true;
                subscribers.clear();
            }
            Command::Close => break,
        }
    }
}
