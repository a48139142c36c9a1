//! # Fetcher abstractions.
//!
//! This module provides the upstream-data seam of the crate:
//! - [`Fetcher`] - trait producing a stream of values for a key
//! - [`FetchFn`] - single-shot, function-backed fetcher
//! - [`FetchStreamFn`] - streaming, function-backed fetcher
//! - [`FetcherRef`] - shared reference to a fetcher (`Arc<dyn Fetcher>`)

mod fetch_fn;
mod fetcher;

pub use fetch_fn::{FetchFn, FetchStreamFn};
pub use fetcher::{Fetcher, FetcherRef};
