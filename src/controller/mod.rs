//! # Fetch controller: one in-flight fetch per key.
//!
//! Combines the [refcount registry](crate::registry) with the
//! [multicast engine](crate::multicast), keyed by request key:
//! - concurrent fetches for one key share a single upstream invocation
//! - every successful item is written through to the source of truth
//!   before fan-out
//! - upstream failures become [`Error`] responses instead of stream failures
//!
//! [`Error`]: crate::StoreResponse::Error

mod fetch_controller;
mod stream;

pub use fetch_controller::{FetchController, SourceWriter};
pub use stream::FetchStream;
