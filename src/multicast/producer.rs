//! # Producer: pulls from upstream, dispatches, awaits one ack.
//!
//! One producer task per engine instance owns the upstream stream's
//! lifetime. The loop per item:
//! 1. pull the next upstream item (cancellable)
//! 2. run `on_each` (the write-through seam) to completion
//! 3. hand the item to the coordinator for fan-out
//! 4. wait until at least one attached subscriber consumed it
//!
//! ## Rules
//! - The ack gate needs ONE acknowledgment, not all: a slow subscriber
//!   falls behind in its own queue while a fast one keeps the producer
//!   advancing.
//! - If every delivery copy is dropped without an ack (no subscriber
//!   attached, or all detached mid-item), the gate opens rather than
//!   deadlocking; teardown is the coordinator's and registry's job.
//! - Cancellation aborts the upstream pull and the ack wait, but never a
//!   running `on_each`: a write-through that already started is allowed to
//!   finish.

use futures::stream::{BoxStream, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::coordinator::Command;
use super::multicaster::OnEach;

/// Runs the producer loop until upstream completion or cancellation.
pub(crate) async fn produce<T: Send + 'static>(
    mut upstream: BoxStream<'static, T>,
    on_each: OnEach<T>,
    commands: mpsc::UnboundedSender<Command<T>>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            next = upstream.next() => match next {
                Some(item) => item,
                None => break,
            },
        };

        let item = (on_each)(item).await;

        let (ack_tx, mut ack_rx) = mpsc::channel::<()>(1);
        if commands
            .send(Command::Dispatch { item, ack: ack_tx })
            .is_err()
        {
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            // Some(()) = first ack; None = all copies dropped unacked.
            _ = ack_rx.recv() => {}
        }
    }

    // Dropping `upstream` cancels any outstanding fetch.
    drop(upstream);
    let _ = commands.send(Command::Complete);
    debug!("producer: finished");
}
