//! Tests for the shared object cache
//!
//! These tests verify:
//! - First insert wins; later inserts get the canonical object back
//! - Concurrent get_or_load on one key runs the load once
//! - A failed or panicking load frees the key for the next caller

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use baw::{BawError, CacheKey, LoadedObject, ObjectCache, SharedCache};

// =============================================================================
// Helper Functions
// =============================================================================

fn object(handle: u64, value: &str) -> LoadedObject {
    LoadedObject::new(handle, 1, Box::new(value.to_string()))
}

// =============================================================================
// Lookup / Insert
// =============================================================================

#[test]
fn test_first_insert_wins() {
    let cache = SharedCache::new();
    let key = CacheKey::new("pack", 7);

    let first = object(7, "first");
    let canonical = cache.insert(key.clone(), first.clone());
    assert!(canonical.ptr_eq(&first));

    let canonical = cache.insert(key.clone(), object(7, "second"));
    assert!(canonical.ptr_eq(&first));
    assert_eq!(canonical.downcast_ref::<String>().unwrap(), "first");

    assert!(cache.lookup(&key).unwrap().ptr_eq(&first));
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_keys_include_source() {
    let cache = SharedCache::new();
    cache.insert(CacheKey::new("a", 1), object(1, "a"));

    assert!(cache.lookup(&CacheKey::new("a", 1)).is_some());
    assert!(cache.lookup(&CacheKey::new("b", 1)).is_none());
    assert!(cache.lookup(&CacheKey::new("a", 2)).is_none());
    assert_eq!(CacheKey::new("a", 1).to_string(), "a#1");
}

#[test]
fn test_remove_and_clear() {
    let cache = SharedCache::new();
    cache.insert(CacheKey::new("s", 1), object(1, "one"));
    cache.insert(CacheKey::new("s", 2), object(2, "two"));

    let removed = cache.remove(&CacheKey::new("s", 1)).unwrap();
    assert_eq!(removed.handle(), 1);
    assert_eq!(cache.len(), 1);

    cache.clear();
    assert!(cache.is_empty());
}

// =============================================================================
// get_or_load
// =============================================================================

#[test]
fn test_concurrent_get_or_load_runs_once() {
    let cache = SharedCache::new();
    let loads = AtomicUsize::new(0);
    let key = CacheKey::new("pack", 42);
    let (cache_ref, loads_ref) = (&cache, &loads);

    let results: Vec<LoadedObject> = crossbeam::thread::scope(|scope| {
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let key = key.clone();
                scope.spawn(move |_| {
                    cache_ref
                        .get_or_load(key, || {
                            loads_ref.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(50));
                            Ok(object(42, "loaded"))
                        })
                        .unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    })
    .unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    for result in &results[1..] {
        assert!(result.ptr_eq(&results[0]));
    }
}

#[test]
fn test_failed_load_frees_key() {
    let cache = SharedCache::new();
    let key = CacheKey::new("pack", 1);

    let failed = cache.get_or_load(key.clone(), || Err(BawError::UnknownHandle(1)));
    assert!(matches!(failed, Err(BawError::UnknownHandle(1))));
    assert!(cache.is_empty());

    let loaded = cache
        .get_or_load(key.clone(), || Ok(object(1, "retry")))
        .unwrap();
    assert!(cache.lookup(&key).unwrap().ptr_eq(&loaded));
}

#[test]
fn test_waiter_takes_over_after_failure() {
    let cache = SharedCache::new();
    let key = CacheKey::new("pack", 5);
    let attempts = AtomicUsize::new(0);
    let (cache_ref, attempts_ref) = (&cache, &attempts);

    let outcomes: Vec<bool> = crossbeam::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let key = key.clone();
                scope.spawn(move |_| {
                    cache_ref
                        .get_or_load(key, || {
                            let n = attempts_ref.fetch_add(1, Ordering::SeqCst);
                            thread::sleep(Duration::from_millis(30));
                            if n == 0 {
                                Err(BawError::Config("first attempt fails".into()))
                            } else {
                                Ok(object(5, "second"))
                            }
                        })
                        .is_ok()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    })
    .unwrap();

    // Whoever ran first failed; the other caller loaded afterwards
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(cache.lookup(&key).is_some());
}

#[test]
fn test_remove_leaves_in_flight_load() {
    let cache = SharedCache::new();
    let loads = AtomicUsize::new(0);
    let key = CacheKey::new("pack", 11);
    let (started_tx, started_rx) = crossbeam::channel::bounded::<()>(0);
    let (proceed_tx, proceed_rx) = crossbeam::channel::bounded::<()>(0);
    let (cache_ref, loads_ref) = (&cache, &loads);

    let (first, second) = crossbeam::thread::scope(|scope| {
        let key_a = key.clone();
        let loader = scope.spawn(move |_| {
            cache_ref
                .get_or_load(key_a, || {
                    loads_ref.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    proceed_rx.recv().unwrap();
                    Ok(object(11, "only load"))
                })
                .unwrap()
        });

        started_rx.recv().unwrap();
        assert!(cache_ref.remove(&key).is_none());
        assert!(cache_ref.lookup(&key).is_none());

        let key_b = key.clone();
        let waiter = scope.spawn(move |_| {
            cache_ref
                .get_or_load(key_b, || {
                    loads_ref.fetch_add(1, Ordering::SeqCst);
                    Ok(object(11, "duplicate load"))
                })
                .unwrap()
        });
        thread::sleep(Duration::from_millis(50));
        proceed_tx.send(()).unwrap();

        (loader.join().unwrap(), waiter.join().unwrap())
    })
    .unwrap();

    assert_eq!(loads.load(Ordering::SeqCst), 1);
    assert!(first.ptr_eq(&second));
    assert_eq!(second.downcast_ref::<String>().unwrap(), "only load");
    assert!(cache.remove(&key).unwrap().ptr_eq(&first));
}

#[test]
fn test_panicking_load_frees_key() {
    let cache = SharedCache::new();
    let key = CacheKey::new("pack", 9);

    let panicked = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        let _ = cache.get_or_load(key.clone(), || panic!("load blew up"));
    }));
    assert!(panicked.is_err());

    let loaded = cache.get_or_load(key, || Ok(object(9, "after panic")));
    assert!(loaded.is_ok());
}
