//! Versioned response cache backing the cache controller.
//!
//! Cached responses live in named generations. Exactly one generation is
//! current at a time (the active version tag); stale generations are purged
//! when a new version activates.

mod store;

pub use store::{CachedResponse, GenerationStore, MemoryStore, SqliteStore};
