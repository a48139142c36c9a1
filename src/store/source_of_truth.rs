//! # Source of truth: the durable collaborator.
//!
//! A [`SourceOfTruth`] is the layer fetched data is written through to
//! *before* it reaches any consumer. Reads back it up as a replay mechanism
//! for keys with no fetch in flight; with one configured, the multicast
//! engine's piggyback mode is disabled because late consumers can replay
//! from here instead.

use async_trait::async_trait;

use crate::error::FetchError;

/// # Durable read/write store backing a [`Store`](crate::Store).
///
/// `write` is the hot path: it is invoked once per successfully fetched
/// item, inside the producer's dispatch path, before fan-out. A failed
/// write surfaces to consumers as `Error(origin=SourceOfTruth)`.
///
/// `delete`/`delete_all` back the store's `clear` operations and default to
/// no-ops for read/write-only implementations.
#[async_trait]
pub trait SourceOfTruth<K, V>: Send + Sync + 'static
where
    K: Send + Sync,
    V: Send,
{
    /// Reads the current value for `key`, if any.
    async fn read(&self, key: &K) -> Option<V>;

    /// Persists one fetched value for `key`.
    async fn write(&self, key: &K, value: V) -> Result<(), FetchError>;

    /// Removes the value for `key`.
    async fn delete(&self, _key: &K) {}

    /// Removes every value.
    async fn delete_all(&self) {}
}
