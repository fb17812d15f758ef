//! Cache Module
//!
//! Provides the request-scoped cache: a concurrent prefix trie for storage,
//! template-based key building, and the get-or-compute manager on top.

pub mod key;
mod manager;
mod single_flight;
mod stats;
mod trie;


// Re-export public types
pub use key::{resolve, resolve_prefix, CacheKey, Entity, KeyParam, ResolvedKey};
pub use manager::ShortTermCacheManager;
pub use single_flight::{KeyGuard, KeyLocks};
pub use stats::{CacheStats, StatsSnapshot};
pub use trie::ConcurrentTrie;
