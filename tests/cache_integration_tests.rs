//! Integration Tests for the Scoped Cache
//!
//! Exercises the public API the way a request handler would: one scope per
//! request, get-or-compute through the manager, invalidation by key and by
//! prefix, and concurrent callers sharing one scope.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::Duration;

use scoped_cache::{key_params, CacheError, CacheKey, Config, RequestScope, ShortTermCacheManager};

// == Helper Functions ==

static TRACING: Once = Once::new();

fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "scoped_cache=debug".into()),
            )
            .with_test_writer()
            .try_init();
    });
}

fn seeded_cache() -> ShortTermCacheManager {
    let cache = ShortTermCacheManager::new();
    cache.set("a/b/1", 1u32).unwrap();
    cache.set("a/b/2", 2u32).unwrap();
    cache.set("a/c/1", 3u32).unwrap();
    cache
}

// == Get-Or-Compute ==

#[test]
fn test_request_scenario() {
    init_tracing();
    let scope = RequestScope::default();
    let cache = scope.cache();

    let first = cache.get("p1", || Some("V1".to_string())).unwrap();
    assert_eq!(first.as_deref(), Some("V1"));

    let cached = cache.get("p1", || Some("V2".to_string())).unwrap();
    assert_eq!(cached.as_deref(), Some("V1"));

    let removed = cache.remove_by_prefix("p", &[]).unwrap();
    assert_eq!(removed, vec!["p1"]);

    let refreshed = cache.get("p1", || Some("V2".to_string())).unwrap();
    assert_eq!(refreshed.as_deref(), Some("V2"));

    let stats = scope.end();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 2);
    assert_eq!(stats.prefix_evictions, 1);
}

#[test]
fn test_second_acquire_not_invoked_on_hit() {
    let cache = ShortTermCacheManager::new();
    let second_called = AtomicUsize::new(0);

    cache.get("k", || Some(10u64)).unwrap();
    let value = cache
        .get("k", || {
            second_called.fetch_add(1, Ordering::SeqCst);
            Some(20u64)
        })
        .unwrap();

    assert_eq!(value, Some(10));
    assert_eq!(second_called.load(Ordering::SeqCst), 0);
}

#[test]
fn test_null_result_triggers_next_acquisition() {
    let cache = ShortTermCacheManager::new();

    assert_eq!(cache.get("k", || None::<String>).unwrap(), None);
    let value = cache.get("k", || Some("loaded".to_string())).unwrap();

    assert_eq!(value.as_deref(), Some("loaded"));
}

#[test]
fn test_get_async_from_sync_context() {
    let cache = ShortTermCacheManager::new();

    let value = tokio_test::block_on(cache.get_async("async-key", || async { Some(7i32) })).unwrap();

    assert_eq!(value, Some(7));
    assert_eq!(cache.get("async-key", || Some(8i32)).unwrap(), Some(7));
}

#[tokio::test]
async fn test_get_async_by_key_template() {
    let cache = ShortTermCacheManager::new();
    let key = CacheKey::new("catalog.products.{0}.{1}").with_prefix("catalog.products.{0}");

    let loaded = cache
        .get_async_by(|| async { Some(vec!["p1", "p2"]) }, &key, &key_params![3, "en"])
        .await
        .unwrap();
    assert_eq!(loaded, Some(vec!["p1", "p2"]));

    let removed = cache
        .remove_by_prefix(&key.prefixes()[0], &key_params![3])
        .unwrap();
    assert_eq!(removed, vec!["catalog.products.3.en"]);
}

#[tokio::test]
async fn test_acquisition_error_leaves_cache_unchanged() {
    let cache = seeded_cache();
    let before = cache.keys();

    let result: anyhow::Result<Option<u32>> = cache
        .try_get_async("a/b/3", || async { Err(anyhow::anyhow!("backend unavailable")) })
        .await;

    assert!(result.is_err());
    assert_eq!(cache.keys(), before);
}

// == Invalidation ==

#[test]
fn test_prefix_eviction() {
    let cache = seeded_cache();

    let removed = cache.remove_by_prefix("a/b", &[]).unwrap();

    assert_eq!(removed, vec!["a/b/1", "a/b/2"]);
    assert_eq!(cache.get("a/c/1", || Some(0u32)).unwrap(), Some(3));
    assert!(!cache.contains("a/b/1"));
    assert!(!cache.contains("a/b/2"));
}

#[test]
fn test_prefix_eviction_without_matches() {
    let cache = seeded_cache();

    let removed = cache.remove_by_prefix("z/z", &[]).unwrap();

    assert!(removed.is_empty());
    assert_eq!(cache.len(), 3);
}

#[test]
fn test_exact_remove_is_scoped() {
    let cache = seeded_cache();

    assert!(cache.remove("a/b/1", &[]).unwrap());

    assert!(!cache.contains("a/b/1"));
    assert!(cache.contains("a/b/2"));
    assert!(cache.contains("a/c/1"));
}

#[test]
fn test_prefix_eviction_with_parameters() {
    let cache = ShortTermCacheManager::new();
    for (store, lang) in [(1, "en"), (1, "de"), (2, "en")] {
        let key = scoped_cache::cache::resolve("store.{0}.lang.{1}", &key_params![store, lang]).unwrap();
        cache.set(&key, format!("{store}-{lang}")).unwrap();
    }

    let removed = cache
        .remove_by_prefix("store.{0}.lang.{1}", &key_params![1])
        .unwrap();

    assert_eq!(removed, vec!["store.1.lang.de", "store.1.lang.en"]);
    assert_eq!(cache.keys(), vec!["store.2.lang.en"]);
}

#[test]
fn test_malformed_template_fails_fast() {
    let cache = seeded_cache();

    let result = cache.remove_by_prefix("a/{0", &key_params![1]);

    assert!(matches!(result, Err(CacheError::MalformedTemplate { .. })));
    assert_eq!(cache.len(), 3);
}

// == Concurrency ==

#[test]
fn test_concurrent_readers_and_writers() {
    let cache = Arc::new(ShortTermCacheManager::new());

    let handles: Vec<_> = (0..8u32)
        .map(|t| {
            let cache = Arc::clone(&cache);
            thread::spawn(move || {
                for i in 0..100u32 {
                    let key = format!("thread/{t}/item/{i}");
                    let value = cache.get(&key, || Some(t * 1000 + i)).unwrap();
                    assert_eq!(value, Some(t * 1000 + i));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 800);
    let removed = cache.remove_by_prefix("thread/3/", &[]).unwrap();
    assert_eq!(removed.len(), 100);
    assert_eq!(cache.len(), 700);
}

#[test]
fn test_prefix_eviction_racing_writes() {
    // Either order is acceptable for keys written during the eviction; only
    // the keys written before it started are guaranteed to be gone.
    let cache = Arc::new(ShortTermCacheManager::new());
    for i in 0..200u32 {
        cache.set(&format!("family/old/{i}"), i).unwrap();
    }

    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            for i in 0..200u32 {
                cache.set(&format!("family/new/{i}"), i).unwrap();
            }
        })
    };
    let removed = cache.remove_by_prefix("family/old/", &[]).unwrap();
    writer.join().unwrap();

    assert_eq!(removed.len(), 200);
    assert!(cache.keys().iter().all(|k| k.starts_with("family/new/")));
    assert_eq!(cache.len(), 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_misses_may_acquire_more_than_once() {
    // Without single-flight nothing coalesces concurrent misses
    let cache = Arc::new(ShortTermCacheManager::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_async("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some(42u32)
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap(), Some(42));
    }

    assert!(calls.load(Ordering::SeqCst) >= 1);
    assert_eq!(cache.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_acquires_once() {
    init_tracing();
    let scope = RequestScope::new(&Config::default().with_single_flight(true));
    let calls = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = Arc::clone(scope.cache());
            let calls = Arc::clone(&calls);
            tokio::spawn(async move {
                cache
                    .get_async("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Some("computed".to_string())
                    })
                    .await
                    .unwrap()
            })
        })
        .collect();
    for task in tasks {
        assert_eq!(task.await.unwrap().as_deref(), Some("computed"));
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
