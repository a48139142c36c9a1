//! # Subscription: one subscriber's view of the engine.
//!
//! A [`Subscription`] is an unbounded inbound queue of dispatched items plus
//! the per-item acknowledgment signal. It implements [`futures::Stream`];
//! an item is acknowledged the moment the stream yields it to the consumer.
//!
//! Dropping a subscription detaches it from the engine (a synchronous
//! message send, safe in `Drop`) without affecting the producer or other
//! subscribers.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::coordinator::{Command, Delivery};

/// A single subscriber's ordered, ack-on-consume item stream.
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<Delivery<T>>,
    id: u64,
    commands: mpsc::UnboundedSender<Command<T>>,
}

impl<T> Subscription<T> {
    pub(crate) fn new(
        rx: mpsc::UnboundedReceiver<Delivery<T>>,
        id: u64,
        commands: mpsc::UnboundedSender<Command<T>>,
    ) -> Self {
        Self { rx, id, commands }
    }

    /// A subscription that yields nothing; handed out by a closed engine.
    pub(crate) fn completed() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(tx);
        let (commands, _gone) = mpsc::unbounded_channel();
        Self {
            rx,
            id: u64::MAX,
            commands,
        }
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(delivery)) => {
                // Consumption is the acknowledgment; first ack per item wins,
                // later ones hit a full/closed channel and are ignored.
                let _ = delivery.ack.try_send(());
                Poll::Ready(Some(delivery.item))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Detach { id: self.id });
    }
}
