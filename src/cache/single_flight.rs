//! Single-Flight Module
//!
//! Optional per-key async locks that let a cache manager run at most one
//! acquisition per key at a time. Entries are dropped from the lock table as
//! soon as nobody holds or waits on them.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// == Key Locks ==
/// Table of async mutexes keyed by resolved cache key.
#[derive(Debug, Default)]
pub struct KeyLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until the lock for `key` is free and takes it.
    pub async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let lock = {
            let mut locks = self.locks.lock();
            Arc::clone(
                locks
                    .entry(key.to_string())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        let guard = Arc::clone(&lock).lock_owned().await;

        KeyGuard {
            owner: self,
            key: key.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of keys currently held or waited on.
    pub fn active(&self) -> usize {
        self.locks.lock().len()
    }
}

// == Key Guard ==
/// Holds one key's lock; releasing it also prunes the table entry when idle.
#[derive(Debug)]
pub struct KeyGuard<'a> {
    owner: &'a KeyLocks,
    key: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();

        let mut locks = self.owner.locks.lock();
        // Only the table and this guard still reference the mutex
        if Arc::strong_count(&self.lock) == 2 {
            if let Some(existing) = locks.get(&self.key) {
                if Arc::ptr_eq(existing, &self.lock) {
                    locks.remove(&self.key);
                }
            }
        }
    }
}
