//! # Store façade: cache → source of truth → dedup'd fetch.
//!
//! Composes the [fetch controller](crate::controller) with a bounded,
//! time-expiring memory cache and an optional durable [`SourceOfTruth`]
//! to implement the public `stream`/`get`/`fresh` contract.
//!
//! ## Contents
//! - [`Store`] - the façade itself
//! - [`StoreBuilder`] - assembles a store from a fetcher and collaborators
//! - [`StoreRequest`] - per-call cache directives
//! - [`CachePolicy`] - memory cache sizing and expiry
//! - [`SourceOfTruth`] - durable read/write collaborator interface

mod builder;
mod cache;
mod request;
mod source_of_truth;
#[allow(clippy::module_inception)]
mod store;

pub use builder::StoreBuilder;
pub use cache::CachePolicy;
pub use request::StoreRequest;
pub use source_of_truth::SourceOfTruth;
pub use store::Store;
