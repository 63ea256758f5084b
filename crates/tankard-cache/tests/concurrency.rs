//! Concurrent access: one recomputation per refresh, stale serving, lock timeouts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use tankard_cache::{
    BackendKind, Cache, CacheConfig, CacheManager, Error, ManualClock, RefreshPolicy,
};
use tempfile::TempDir;

const THREADS: usize = 16;

fn herd(caches: Vec<Arc<Cache>>) -> (usize, Vec<String>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(THREADS));

    let threads: Vec<_> = (0..THREADS)
        .map(|i| {
            let cache = Arc::clone(&caches[i % caches.len()]);
            let calls = Arc::clone(&calls);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                cache
                    .get_or_create("report", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(50));
                        format!("computed by {i}")
                    })
                    .unwrap()
            })
        })
        .collect();

    let values = threads.into_iter().map(|t| t.join().unwrap()).collect();
    (calls.load(Ordering::SeqCst), values)
}

fn assert_single_computation(calls: usize, values: &[String]) {
    assert_eq!(calls, 1);
    assert!(values.iter().all(|v| v == &values[0]));
}

#[test]
fn test_memory_thundering_herd_computes_once() {
    let manager = CacheManager::new(CacheConfig::new());
    let cache = manager.get_cache("herd").unwrap();

    let (calls, values) = herd(vec![Arc::clone(&cache)]);
    assert_single_computation(calls, &values);
    assert_eq!(cache.stats().recomputations, 1);
    assert_eq!(cache.stats().active_locks, 0);
}

#[test]
fn test_caches_sharing_storage_compute_once() {
    let manager = CacheManager::new(CacheConfig::new());
    let a = manager.get_cache("herd").unwrap();
    let b = manager
        .get_cache_with("herd", &CacheConfig::new().with_expire(Duration::from_secs(600)))
        .unwrap();
    assert!(!Arc::ptr_eq(&a, &b));

    let (calls, values) = herd(vec![a, b]);
    assert_single_computation(calls, &values);
}

#[test]
fn test_file_backend_separate_managers_compute_once() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::new()
        .with_backend(BackendKind::File)
        .with_data_dir(dir.path());

    // Separate managers have separate in-process lock tables, like two processes.
    let a = CacheManager::new(config.clone()).get_cache("herd").unwrap();
    let b = CacheManager::new(config).get_cache("herd").unwrap();

    let (calls, values) = herd(vec![a, b]);
    assert_single_computation(calls, &values);
}

#[test]
fn test_dbm_backend_separate_managers_compute_once() {
    let dir = TempDir::new().unwrap();
    let config = CacheConfig::new()
        .with_backend(BackendKind::Dbm)
        .with_data_dir(dir.path());

    let a = CacheManager::new(config.clone()).get_cache("herd").unwrap();
    let b = CacheManager::new(config).get_cache("herd").unwrap();

    let (calls, values) = herd(vec![a, b]);
    assert_single_computation(calls, &values);
}

#[test]
fn test_serve_stale_while_recomputing() {
    let clock = ManualClock::default();
    let manager = CacheManager::new(
        CacheConfig::new()
            .with_expire(Duration::from_secs(10))
            .with_refresh(RefreshPolicy::ServeStale),
    )
    .with_clock(Arc::new(clock.clone()));
    let cache = manager.get_cache("stale").unwrap();

    cache.set_value("k", &"old").unwrap();
    clock.advance(Duration::from_secs(10));

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            cache
                .get_or_create("k", || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    "new".to_string()
                })
                .unwrap()
        })
    };

    entered_rx.recv().unwrap();
    let served: String = cache
        .get_or_create("k", || panic!("second recomputation"))
        .unwrap();
    assert_eq!(served, "old");

    release_tx.send(()).unwrap();
    assert_eq!(writer.join().unwrap(), "new");
    assert_eq!(cache.get_value::<String>("k").unwrap(), "new");
}

#[test]
fn test_wait_policy_blocks_until_refreshed() {
    let clock = ManualClock::default();
    let manager = CacheManager::new(CacheConfig::new().with_expire(Duration::from_secs(10)))
        .with_clock(Arc::new(clock.clone()));
    let cache = manager.get_cache("wait").unwrap();

    cache.set_value("k", &"old").unwrap();
    clock.advance(Duration::from_secs(10));

    let (entered_tx, entered_rx) = mpsc::channel();
    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            cache
                .get_or_create("k", || {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    "new".to_string()
                })
                .unwrap()
        })
    };

    entered_rx.recv().unwrap();
    let waited: String = cache
        .get_or_create("k", || panic!("second recomputation"))
        .unwrap();
    assert_eq!(waited, "new");
    writer.join().unwrap();
}

#[test]
fn test_lock_timeout_reported() {
    let manager =
        CacheManager::new(CacheConfig::new().with_lock_timeout(Duration::from_millis(20)));
    let cache = manager.get_cache("timeout").unwrap();

    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let writer = {
        let cache = Arc::clone(&cache);
        thread::spawn(move || {
            cache
                .get_or_create("k", || {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    1
                })
                .unwrap()
        })
    };

    entered_rx.recv().unwrap();
    let err = cache.get_or_create("k", || 2).unwrap_err();
    assert!(matches!(err, Error::LockTimeout { .. }));
    assert!(err.is_recoverable());

    release_tx.send(()).unwrap();
    assert_eq!(writer.join().unwrap(), 1);
    assert_eq!(cache.stats().lock_timeouts, 1);
}

#[test]
fn test_different_keys_recompute_in_parallel() {
    let manager = CacheManager::new(CacheConfig::new());
    let cache = manager.get_cache("parallel").unwrap();
    let barrier = Arc::new(Barrier::new(2));

    let threads: Vec<_> = ["a", "b"]
        .into_iter()
        .map(|key| {
            let cache = Arc::clone(&cache);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                cache
                    .get_or_create(key, || {
                        // Both creators must be inside at once to pass the barrier.
                        barrier.wait();
                        key.to_string()
                    })
                    .unwrap()
            })
        })
        .collect();

    let mut values: Vec<String> = threads.into_iter().map(|t| t.join().unwrap()).collect();
    values.sort();
    assert_eq!(values, vec!["a", "b"]);
}
