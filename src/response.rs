//! # Tagged responses emitted by stores and fetch streams.
//!
//! Every value handed to a consumer is wrapped in a [`StoreResponse`] that
//! records *which layer produced it* via [`ResponseOrigin`]:
//! - `Loading` - a fetch round-trip is about to start
//! - `Data` - a value, from the memory cache, the source of truth, or the fetcher
//! - `Error` - a failure converted into a value (response streams never fail)
//!
//! ## Rules
//! - Exactly one variant is active per instance; instances are immutable.
//! - Matching is exhaustive; adding a variant is a breaking change.
//! - The error payload is a [`FetchError`], cloneable so one upstream failure
//!   can be fanned out to every subscriber.

use crate::error::{FetchError, StoreError};

/// The layer that produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseOrigin {
    /// In-memory cache.
    Cache,
    /// Durable source of truth.
    SourceOfTruth,
    /// Upstream fetcher (network or similar).
    Fetcher,
}

/// A value, error, or progress marker tagged with its originating layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreResponse<T> {
    /// A fetch is in flight for this key.
    Loading {
        /// Layer that is producing the value.
        origin: ResponseOrigin,
    },
    /// A value was produced.
    Data {
        /// The value itself.
        value: T,
        /// Layer that produced it.
        origin: ResponseOrigin,
    },
    /// A failure was converted into a value.
    Error {
        /// The underlying failure.
        error: FetchError,
        /// Layer in which the failure occurred.
        origin: ResponseOrigin,
    },
}

impl<T> StoreResponse<T> {
    /// Shorthand for a `Loading` response.
    #[inline]
    pub fn loading(origin: ResponseOrigin) -> Self {
        StoreResponse::Loading { origin }
    }

    /// Shorthand for a `Data` response.
    #[inline]
    pub fn data(value: T, origin: ResponseOrigin) -> Self {
        StoreResponse::Data { value, origin }
    }

    /// Shorthand for an `Error` response.
    #[inline]
    pub fn error(error: impl Into<FetchError>, origin: ResponseOrigin) -> Self {
        StoreResponse::Error {
            error: error.into(),
            origin,
        }
    }

    /// Returns the origin tag of this response.
    pub fn origin(&self) -> ResponseOrigin {
        match self {
            StoreResponse::Loading { origin }
            | StoreResponse::Data { origin, .. }
            | StoreResponse::Error { origin, .. } => *origin,
        }
    }

    /// Returns a reference to the value, if this is a `Data` response.
    pub fn value(&self) -> Option<&T> {
        match self {
            StoreResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Consumes the response and returns the value, if this is `Data`.
    pub fn into_value(self) -> Option<T> {
        match self {
            StoreResponse::Data { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns the error, if this is an `Error` response.
    pub fn as_error(&self) -> Option<&FetchError> {
        match self {
            StoreResponse::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    #[inline]
    pub fn is_loading(&self) -> bool {
        matches!(self, StoreResponse::Loading { .. })
    }

    #[inline]
    pub fn is_data(&self) -> bool {
        matches!(self, StoreResponse::Data { .. })
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        matches!(self, StoreResponse::Error { .. })
    }

    /// Extracts the value or converts the response into a [`StoreError`].
    ///
    /// Used by `get`/`fresh`, which are single-value extractions:
    /// - `Data` → `Ok(value)`
    /// - `Error` → `Err(StoreError::Fetch)`
    /// - `Loading` → `Err(StoreError::MissingValue)` (nothing to extract)
    pub fn require_value(self) -> Result<T, StoreError> {
        match self {
            StoreResponse::Data { value, .. } => Ok(value),
            StoreResponse::Error { error, .. } => Err(StoreError::Fetch(error)),
            StoreResponse::Loading { .. } => Err(StoreError::MissingValue),
        }
    }
}
