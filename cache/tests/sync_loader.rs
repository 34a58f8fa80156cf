mod common;

use common::await_until;
use fibre_segcache::{BoxError, Cache, CacheBuilder, CacheError, EntryListener, Expiry, LoaderError};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_loader_fills_misses() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .loader({
      let load_count = load_count.clone();
      move |key: &u32| {
        load_count.fetch_add(1, Ordering::SeqCst);
        Ok::<_, BoxError>(format!("value-{key}"))
      }
    })
    .build()
    .unwrap();
  assert!(cache.is_decorated());

  assert_eq!(cache.get(&7).unwrap().as_deref().map(String::as_str), Some("value-7"));
  assert_eq!(cache.get(&7).unwrap().as_deref().map(String::as_str), Some("value-7"));
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "loader should not be called again");

  let metrics = cache.metrics();
  assert_eq!(metrics.misses, 1);
  assert_eq!(metrics.hits, 1);
  assert_eq!(metrics.loads, 1);
  assert_eq!(metrics.inserts, 1);
}

#[test]
fn test_loader_failure_is_cached() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .loader({
      let load_count = load_count.clone();
      move |key: &u32| -> Result<String, BoxError> {
        load_count.fetch_add(1, Ordering::SeqCst);
        Err(format!("backend has no {key}").into())
      }
    })
    .build()
    .unwrap();

  let first = cache.get(&1).unwrap_err();
  let second = cache.get(&1).unwrap_err();
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "failure is served from the cache");

  match (&first, &second) {
    (CacheError::Loader(a), CacheError::Loader(b)) => {
      assert!(a.same_cause(b), "every read sees the same cause");
      assert_eq!(a.cause().to_string(), "backend has no 1");
    }
    other => panic!("expected loader errors, got {other:?}"),
  }

  // A cached failure is not a value.
  assert_eq!(cache.peek(&1), None);
  assert!(!cache.contains_key(&1));
  assert_eq!(cache.iter().count(), 0);
  assert_eq!(cache.metrics().load_failures, 1);
}

#[test]
fn test_failure_expiry_follows_the_policy() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .expiry_policy(|_: &u32, value: Result<&String, &LoaderError>, now: Instant| match value {
      Ok(_) => Expiry::Eternal,
      Err(_) => Expiry::At(now + Duration::from_millis(50)),
    })
    .loader({
      let load_count = load_count.clone();
      move |_: &u32| -> Result<String, BoxError> {
        let attempt = load_count.fetch_add(1, Ordering::SeqCst);
        if attempt == 0 {
          Err("first attempt fails".into())
        } else {
          Ok("recovered".to_string())
        }
      }
    })
    .build()
    .unwrap();

  assert!(cache.get(&1).is_err());
  assert!(cache.get(&1).is_err());
  assert_eq!(load_count.load(Ordering::SeqCst), 1);

  thread::sleep(Duration::from_millis(100));
  assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("recovered"));
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_loader_thundering_herd() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let num_threads = 8;
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .loader({
      let load_count = load_count.clone();
      move |key: &u32| {
        load_count.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(100));
        Ok::<_, BoxError>(format!("value-{key}"))
      }
    })
    .build()
    .unwrap();

  let barrier = Arc::new(Barrier::new(num_threads));
  let handles: Vec<_> = (0..num_threads)
    .map(|_| {
      let cache = cache.clone();
      let barrier = barrier.clone();
      thread::spawn(move || {
        barrier.wait();
        cache.get(&42).unwrap()
      })
    })
    .collect();

  for handle in handles {
    let value = handle.join().unwrap();
    assert_eq!(value.as_deref().map(String::as_str), Some("value-42"));
  }
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "loader should only be called once");
}

#[test]
fn test_loader_panic_is_not_cached() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .loader({
      let load_count = load_count.clone();
      move |key: &u32| -> Result<String, BoxError> {
        if load_count.fetch_add(1, Ordering::SeqCst) == 0 {
          panic!("loader blew up");
        }
        Ok(format!("value-{key}"))
      }
    })
    .build()
    .unwrap();

  let outcome = catch_unwind(AssertUnwindSafe(|| cache.get(&3)));
  assert!(outcome.is_err(), "the panic reaches the calling thread");
  assert!(cache.is_empty());

  assert_eq!(cache.get(&3).unwrap().as_deref().map(String::as_str), Some("value-3"));
  assert_eq!(load_count.load(Ordering::SeqCst), 2);
}

#[test]
fn test_advanced_loader_sees_the_replaced_entry() {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .expire_after_write(Duration::from_millis(50))
    .advanced_loader({
      let seen = seen.clone();
      move |key: &u32, _start: Instant, current: Option<&fibre_segcache::EntrySnapshot<u32, String>>| {
        let previous = current.and_then(|entry| entry.value().map(|v| v.to_string()));
        seen.lock().unwrap().push(previous);
        Ok::<_, BoxError>(format!("value-{key}"))
      }
    })
    .build()
    .unwrap();

  cache.get(&1).unwrap();
  thread::sleep(Duration::from_millis(100));
  // The expired entry is removed, then handed to the reload.
  cache.get(&1).unwrap();

  assert_eq!(*seen.lock().unwrap(), vec![None, Some("value-1".to_string())]);
  assert_eq!(cache.metrics().expirations, 1);
}

#[test]
fn test_refresh_ahead_serves_stale_value() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let refreshed_from = Arc::new(Mutex::new(Vec::new()));
  let updates = Arc::new(AtomicUsize::new(0));

  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .expire_after_write(Duration::from_millis(150))
    .refresh_ahead(true)
    .advanced_loader({
      let load_count = load_count.clone();
      let refreshed_from = refreshed_from.clone();
      move |_: &u32, _start: Instant, current: Option<&fibre_segcache::EntrySnapshot<u32, String>>| {
        if let Some(value) = current.and_then(|entry| entry.value()) {
          refreshed_from.lock().unwrap().push(value.to_string());
        }
        let generation = load_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok::<_, BoxError>(format!("v{generation}"))
      }
    })
    .listener(EntryListener::new().on_updated({
      let updates = updates.clone();
      move |_, _| {
        updates.fetch_add(1, Ordering::SeqCst);
      }
    }))
    .build()
    .unwrap();

  assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("v1"));
  thread::sleep(Duration::from_millis(200));

  // The stale value is served while the reload runs.
  assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("v1"));
  assert!(await_until(Duration::from_secs(2), || cache
    .peek(&1)
    .is_some_and(|value| value.as_str() == "v2")));

  assert_eq!(load_count.load(Ordering::SeqCst), 2);
  assert_eq!(*refreshed_from.lock().unwrap(), vec!["v1".to_string()]);
  assert_eq!(updates.load(Ordering::SeqCst), 1, "a refresh is reported as an update");
}

#[test]
fn test_cache_without_loader_returns_none() {
  let cache: Cache<u32, String> = CacheBuilder::new()
    .entry_capacity(100)
    .weigher(|_: &u32, value: &String| value.len() as u64)
    .build()
    .unwrap();
  assert!(cache.is_decorated());
  assert_eq!(cache.get(&1).unwrap(), None);
}
