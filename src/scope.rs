//! Request Scope Module
//!
//! Ties one cache manager to one unit of work. The host creates a scope when
//! a request starts, hands clones of [`RequestScope::cache`] to whatever
//! serves it, and ends or drops the scope when the request is done.

use std::sync::Arc;

use tracing::debug;

use crate::cache::{ShortTermCacheManager, StatsSnapshot};
use crate::config::Config;

// == Request Scope ==
/// Owner of the short-term cache for a single request.
#[derive(Debug)]
pub struct RequestScope {
    cache: Arc<ShortTermCacheManager>,
    log_summary: bool,
}

impl RequestScope {
    /// Starts a scope with a fresh, empty cache.
    pub fn new(config: &Config) -> Self {
        Self {
            cache: Arc::new(ShortTermCacheManager::from_config(config)),
            log_summary: config.log_scope_summary,
        }
    }

    /// Shared handle to this scope's cache.
    pub fn cache(&self) -> &Arc<ShortTermCacheManager> {
        &self.cache
    }

    /// Ends the scope, returning the final statistics.
    ///
    /// Handles cloned from [`cache`](Self::cache) keep the manager alive, but
    /// the scope's own view of it ends here.
    pub fn end(self) -> StatsSnapshot {
        self.cache.stats()
    }
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new(&Config::default())
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if self.log_summary {
            let stats = self.cache.stats();
            debug!(
                hits = stats.hits,
                misses = stats.misses,
                entries = stats.total_entries,
                hit_rate = stats.hit_rate(),
                "request scope ended"
            );
        }
    }
}
