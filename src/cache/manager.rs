//! Cache Manager Module
//!
//! Short-term get-or-compute cache composed of the concurrent trie and the
//! key builder. One manager lives for one unit of work; see
//! [`crate::scope::RequestScope`].
//!
//! # Concurrency
//! Lookups, writes and evictions are safe from any number of threads or
//! tasks. Get-or-compute is racy by default: two callers missing the same key
//! at once both run their acquisition and both store the result, last write
//! wins. Enabling `Config::single_flight` serializes async acquisitions per
//! key instead. An eviction racing a write under the same prefix may land on
//! either side of it.

use std::any::{type_name, Any};
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::key::{self, CacheKey, KeyParam};
use crate::cache::single_flight::KeyLocks;
use crate::cache::stats::{CacheStats, StatsSnapshot};
use crate::cache::trie::ConcurrentTrie;
use crate::config::Config;
use crate::error::{CacheError, Result};

type Stored = Arc<dyn Any + Send + Sync>;

fn ensure_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(CacheError::EmptyKey);
    }
    Ok(())
}

// == Short Term Cache Manager ==
/// Cache for values computed while serving one request.
///
/// Values of any `Clone + Send + Sync` type can be stored side by side; each
/// lookup names the type it expects back.
#[derive(Debug)]
pub struct ShortTermCacheManager {
    store: ConcurrentTrie<Stored>,
    stats: CacheStats,
    /// Present when single-flight acquisition is enabled
    key_locks: Option<KeyLocks>,
}

impl ShortTermCacheManager {
    // == Constructor ==
    /// Creates an empty manager with default settings.
    pub fn new() -> Self {
        Self::from_config(&Config::default())
    }

    /// Creates an empty manager from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            store: ConcurrentTrie::new(),
            stats: CacheStats::new(),
            key_locks: config.single_flight.then(KeyLocks::new),
        }
    }

    /// Reads `key` as a `T` without touching statistics.
    fn cached<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + 'static,
    {
        let Some(stored) = self.store.try_get(key) else {
            return Ok(None);
        };
        match stored.downcast_ref::<T>() {
            Some(value) => Ok(Some(value.clone())),
            None => Err(CacheError::TypeMismatch {
                key: key.to_string(),
                expected: type_name::<T>(),
            }),
        }
    }

    /// Lookup step shared by every get-or-compute flavour.
    fn lookup<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: Clone + 'static,
    {
        ensure_key(key)?;
        let cached = self.cached::<T>(key)?;
        if cached.is_some() {
            self.stats.record_hit();
            debug!(key, "short-term cache hit");
        } else {
            self.stats.record_miss();
            debug!(key, "short-term cache miss");
        }
        Ok(cached)
    }

    /// Stores a successful acquisition; `None` results are not cached.
    fn store_acquired<T>(&self, key: &str, acquired: &Option<T>)
    where
        T: Clone + Send + Sync + 'static,
    {
        self.stats.record_acquisition();
        if let Some(value) = acquired {
            self.put(key, value.clone());
        }
    }

    fn put<T>(&self, key: &str, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.store.set(key, Arc::new(value));
        self.stats.record_stored();
        debug!(key, "short-term cache store");
    }

    // == Get ==
    /// Returns the value cached at `key`, or runs `acquire` and caches its
    /// result when it is `Some`.
    pub fn get<T, F>(&self, key: &str, acquire: F) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Option<T>,
    {
        self.try_get(key, || Ok::<_, CacheError>(acquire()))
    }

    /// Like [`get`](Self::get) with a fallible acquisition.
    ///
    /// An acquisition error is returned unchanged and nothing is stored.
    pub fn try_get<T, E, F>(&self, key: &str, acquire: F) -> std::result::Result<Option<T>, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> std::result::Result<Option<T>, E>,
    {
        if let Some(value) = self.lookup::<T>(key)? {
            return Ok(Some(value));
        }

        let acquired = acquire()?;
        self.store_acquired(key, &acquired);
        Ok(acquired)
    }

    // == Get Async ==
    /// Async counterpart of [`get`](Self::get).
    pub async fn get_async<T, F, Fut>(&self, key: &str, acquire: F) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        self.try_get_async(key, || async move { Ok::<_, CacheError>(acquire().await) })
            .await
    }

    /// Async counterpart of [`try_get`](Self::try_get).
    ///
    /// With single-flight enabled, concurrent misses on the same key wait for
    /// each other and re-check the cache before acquiring.
    pub async fn try_get_async<T, E, F, Fut>(
        &self,
        key: &str,
        acquire: F,
    ) -> std::result::Result<Option<T>, E>
    where
        T: Clone + Send + Sync + 'static,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Option<T>, E>>,
    {
        if let Some(value) = self.lookup::<T>(key)? {
            return Ok(Some(value));
        }

        let _flight = match &self.key_locks {
            Some(locks) => {
                let guard = locks.lock(key).await;
                if let Some(value) = self.cached::<T>(key)? {
                    debug!(key, "short-term cache filled by concurrent acquisition");
                    return Ok(Some(value));
                }
                Some(guard)
            }
            None => None,
        };

        let acquired = acquire().await?;
        self.store_acquired(key, &acquired);
        Ok(acquired)
    }

    /// Resolves `cache_key` with `params` and delegates to
    /// [`get_async`](Self::get_async).
    pub async fn get_async_by<T, F, Fut>(
        &self,
        acquire: F,
        cache_key: &CacheKey,
        params: &[KeyParam],
    ) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Option<T>>,
    {
        let resolved = cache_key.create(params)?;
        debug!(
            key = %resolved.key,
            prefixes = ?resolved.prefixes,
            "short-term cache keyed lookup"
        );
        self.get_async(&resolved.key, acquire).await
    }

    // == Set ==
    /// Stores `value` at `key`, replacing whatever was there.
    pub fn set<T>(&self, key: &str, value: T) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        ensure_key(key)?;
        self.put(key, value);
        Ok(())
    }

    // == Remove ==
    /// Removes the value at the key resolved from `template` and `params`.
    /// With no parameters `template` is taken as the literal key.
    ///
    /// Returns whether a value was removed.
    pub fn remove(&self, template: &str, params: &[KeyParam]) -> Result<bool> {
        let key = key::resolve(template, params)?;
        let removed = self.store.remove(&key).is_some();
        if removed {
            self.stats.record_removal();
            debug!(key = %key, "short-term cache remove");
        }
        Ok(removed)
    }

    // == Remove By Prefix ==
    /// Removes every value whose key starts with the prefix resolved from
    /// `template` and `params`, including a value stored at the prefix itself.
    ///
    /// Returns the removed keys; an empty list is not an error.
    pub fn remove_by_prefix(&self, template: &str, params: &[KeyParam]) -> Result<Vec<String>> {
        let prefix = key::resolve_prefix(template, params)?;
        let removed = self.store.remove_by_prefix(&prefix);
        self.stats.record_prefix_eviction(removed.len());
        info!(prefix = %prefix, removed = removed.len(), "short-term cache prefix eviction");
        Ok(removed)
    }

    // == Clear ==
    /// Drops every cached value. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let removed = self.store.clear();
        self.stats.record_prefix_eviction(removed);
        removed
    }

    // == Introspection ==
    /// Checks whether a value is cached at `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }

    /// Sorted snapshot of the cached keys.
    pub fn keys(&self) -> Vec<String> {
        self.store.keys()
    }

    /// Returns the current number of cached values.
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.store.len())
    }

    pub fn single_flight(&self) -> bool {
        self.key_locks.is_some()
    }
}

impl Default for ShortTermCacheManager {
    fn default() -> Self {
        Self::new()
    }
}
