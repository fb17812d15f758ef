//! Scoped Cache - A request-scoped in-memory cache
//!
//! Stores computed values under hierarchical string keys for the lifetime of
//! one unit of work, with eviction of a single key or of every key sharing a
//! prefix.

pub mod cache;
pub mod config;
pub mod error;
pub mod scope;

pub use cache::{CacheKey, ConcurrentTrie, Entity, KeyParam, ShortTermCacheManager, StatsSnapshot};
pub use config::Config;
pub use error::{CacheError, Result};
pub use scope::RequestScope;
