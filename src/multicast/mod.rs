//! # Multicast engine: one producer, many ordered subscribers.
//!
//! For a single key, the engine runs exactly one upstream producer task and
//! fans its output out to N subscribers with ordering and backpressure
//! guarantees.
//!
//! ## Architecture
//! ```text
//! Multicaster::subscribe()  ──►  lazy start on first use
//!
//!   producer task                    coordinator task (single owner)
//!   ┌────────────────────┐          ┌─────────────────────────────┐
//!   │ pull item          │          │ command queue:              │
//!   │ on_each(item)      │ Dispatch │   Attach / Detach           │
//!   │ send Dispatch ─────┼─────────►│   Dispatch / Complete/Close │
//!   │ await first ack ◄──┼──────────┤ fan out, insertion order    │
//!   └────────────────────┘          └──────┬──────────┬───────────┘
//!                                          ▼          ▼
//!                                    [queue sub1] [queue sub2] ...
//!                                          │          │
//!                                    Subscription  Subscription
//!                                    (ack on consume)
//! ```
//!
//! ## Rules
//! - At most one producer task per engine instance.
//! - Item *n+1* is not dispatched until item *n* was consumed by at least
//!   one attached subscriber (global backpressure gate, first ack wins).
//! - Each attached subscriber sees every item from its attachment point
//!   onward, in production order, no gaps, no duplicates.
//! - The subscriber set lives inside the coordinator task; no locks.

mod coordinator;
mod multicaster;
mod producer;
mod subscription;

pub use multicaster::{Multicaster, OnEach, SourceFn};
pub use subscription::Subscription;

use futures::FutureExt;
use std::sync::Arc;

/// An `on_each` hook that passes every item through unchanged.
pub fn passthrough<T: Send + 'static>() -> OnEach<T> {
    Arc::new(|item| futures::future::ready(item).boxed())
}
