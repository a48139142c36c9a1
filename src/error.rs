//! Error types used by the storecast runtime.
//!
//! This module defines two error types:
//!
//! - [`FetchError`] - a cloneable failure produced by a fetcher or a
//!   source-of-truth write. It travels *inside* [`StoreResponse::Error`]
//!   (one upstream failure is fanned out to every subscriber), so it must
//!   be cheap to clone.
//! - [`StoreError`] - errors surfaced by the store API itself
//!   (`get`/`fresh` extraction, registry lifecycle misuse).
//!
//! Both types provide `as_label()` for logging/metrics.
//!
//! [`StoreResponse::Error`]: crate::response::StoreResponse::Error

use std::sync::Arc;
use thiserror::Error;

/// A failure produced while fetching or persisting a value.
///
/// Backed by a shared string so it can be cloned into every subscriber's
/// copy of an [`Error`](crate::response::StoreResponse::Error) response
/// without duplicating the payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct FetchError {
    message: Arc<str>,
}

impl FetchError {
    /// Creates a new fetch error with the given message.
    pub fn new(message: impl Into<Arc<str>>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<&str> for FetchError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for FetchError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// # Errors surfaced by the store API.
///
/// [`UntrackedRelease`](StoreError::UntrackedRelease) indicates a lifecycle
/// bug in the caller and is never swallowed; the other variants are the
/// single-value extraction failures of `get`/`fresh`.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// A key/resource pair was released that the registry is not tracking.
    ///
    /// This is a programming-contract violation (double release, or release
    /// without a prior acquire), not a data condition.
    #[error("released key is not tracked by the registry: {key}")]
    UntrackedRelease {
        /// Debug rendering of the offending key.
        key: String,
    },

    /// The fetch for this key failed.
    #[error("fetch failed: {0}")]
    Fetch(#[source] FetchError),

    /// The response stream completed without producing a value.
    #[error("no value produced for this key")]
    MissingValue,
}

impl StoreError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use storecast::StoreError;
    ///
    /// assert_eq!(StoreError::MissingValue.as_label(), "store_missing_value");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StoreError::UntrackedRelease { .. } => "store_untracked_release",
            StoreError::Fetch(_) => "store_fetch_failed",
            StoreError::MissingValue => "store_missing_value",
        }
    }
}
