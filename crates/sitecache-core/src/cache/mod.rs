//! Versioned response cache.
//!
//! This module provides `CacheStorage`, the per-origin collection of named
//! caches, and `NamedCache`, one versioned cache mapping a GET request's
//! identity to a stored response. Exactly one cache (the one named after the
//! active version) is current; activation purges the rest.

pub mod entry;
pub mod storage;

pub use entry::CachedResponse;
pub use storage::{CacheStorage, NamedCache};
