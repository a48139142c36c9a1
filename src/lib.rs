//! # storecast
//!
//! **Storecast** is a concurrency engine for data loading and caching.
//!
//! It deduplicates concurrent fetches per key, multicasts each fetcher's
//! responses to every interested consumer, and layers an optional memory
//! cache and source of truth on top. The crate is designed as a building
//! block for repositories and data layers in async applications.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │   consumer   │   │   consumer   │   │   consumer   │
//!     │ stream(req)  │   │   get(key)   │   │  fresh(key)  │
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  Store (read-path façade)                                 │
//! │  - MemoryCache (moka, bounded + TTL)                      │
//! │  - SourceOfTruth (user persistence, read/write/delete)    │
//! └──────────────────────────┬────────────────────────────────┘
//!                            ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  FetchController (one engine per in-flight key)           │
//! │  - RefcountRegistry (create on first fetch,               │
//! │    destroy after last stream ends)                        │
//! │  - write-through hook (SourceOfTruth.write per item)      │
//! └──────┬──────────────────────────┬─────────────────────────┘
//!        ▼                          ▼
//!     ┌──────────────┐           ┌──────────────┐
//!     │  Multicaster │           │  Multicaster │
//!     │  (key "a")   │           │  (key "b")   │
//!     └┬─────────────┘           └┬─────────────┘
//!      │ producer task             │ producer task
//!      │ - pulls Fetcher::stream   │
//!      │ - runs write-through      │
//!      │ - waits for one ack       │
//!      ▼                           ▼
//!   subscriptions (per-consumer queues, insertion order)
//! ```
//!
//! ### Read path
//! ```text
//! StoreRequest ──► Store::stream()
//!
//! if !refresh {
//!   ├─► memory cache hit        ─► Data { origin: Cache }, done
//!   └─► source-of-truth read    ─► Data { origin: SourceOfTruth }, done
//! }
//! otherwise (or on miss):
//!   ├─► Loading { origin: Fetcher }
//!   ├─► FetchController::fetch(key)
//!   │     ├─ acquire engine (shared with concurrent callers)
//!   │     ├─ per item: write-through, then fan out
//!   │     └─ release engine when the stream ends or is dropped
//!   └─► Data / Error { origin: Fetcher | SourceOfTruth }
//! ```
//!
//! Response streams never fail: fetcher and write-through failures arrive
//! as [`StoreResponse::Error`] values and the stream ends after them.
//!
//! ## Features
//! | Area            | Description                                                       | Key types / traits                     |
//! |-----------------|-------------------------------------------------------------------|----------------------------------------|
//! | **Store**       | Read-path façade: cache, source of truth, deduplicated fetches.   | [`Store`], [`StoreBuilder`], [`StoreRequest`] |
//! | **Responses**   | Tagged values carrying the layer they came from.                  | [`StoreResponse`], [`ResponseOrigin`]  |
//! | **Fetching**    | Define fetchers as functions or streams.                          | [`Fetcher`], [`FetchFn`], [`FetchStreamFn`] |
//! | **Persistence** | Plug in durable storage with write-through.                       | [`SourceOfTruth`]                      |
//! | **Dedup**       | One fetch per key, shared by every concurrent caller.             | [`FetchController`], [`RefcountRegistry`] |
//! | **Multicast**   | Fan a stream out to many consumers with backpressure.             | [`Multicaster`], [`Subscription`]      |
//! | **Errors**      | Typed errors for fetching and store operations.                   | [`FetchError`], [`StoreError`]         |
//!
//! ## Example
//! ```rust
//! use storecast::{FetchFn, FetcherRef, Store};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher: FetcherRef<String, String> = FetchFn::arc(|key: String| async move {
//!         Ok::<_, storecast::FetchError>(format!("value for {key}"))
//!     });
//!
//!     let store = Store::from_fetcher(fetcher).build();
//!
//!     let value = store.get("user/42".to_string()).await?;
//!     assert_eq!(value, "value for user/42");
//!
//!     // Second read is served from the memory cache.
//!     let again = store.get("user/42".to_string()).await?;
//!     assert_eq!(again, value);
//!     Ok(())
//! }
//! ```
mod controller;
mod error;
mod fetch;
mod multicast;
mod registry;
mod response;
mod store;

// ---- Public re-exports ----

pub use controller::{FetchController, FetchStream, SourceWriter};
pub use error::{FetchError, StoreError};
pub use fetch::{FetchFn, FetchStreamFn, Fetcher, FetcherRef};
pub use multicast::{passthrough, Multicaster, OnEach, SourceFn, Subscription};
pub use registry::RefcountRegistry;
pub use response::{ResponseOrigin, StoreResponse};
pub use store::{CachePolicy, SourceOfTruth, Store, StoreBuilder, StoreRequest};
