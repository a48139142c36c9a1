//! # Reference-counted resource registry.
//!
//! Owns the lifecycle of one shared resource per key: created on first
//! acquisition, destroyed exactly once after the last release.
//!
//! The only public type is [`RefcountRegistry`]; the fetch controller uses it
//! to hold one multicast engine per in-flight key.

mod refcount;

pub use refcount::RefcountRegistry;
pub(crate) use refcount::TryRelease;
