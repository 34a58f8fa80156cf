use fibre_segcache::{BoxError, Cache, CacheBuilder, CacheError, TaskSpawner};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::Barrier;
use tokio::time::{sleep, Duration};

#[tokio::test]
async fn test_async_loader_basic() {
  let load_count = Arc::new(AtomicUsize::new(0));

  let cache: Cache<i32, i32> = CacheBuilder::new()
    .entry_capacity(10)
    .async_loader({
      let load_count = load_count.clone();
      move |key: i32| {
        let load_count = load_count.clone();
        async move {
          load_count.fetch_add(1, Ordering::SeqCst);
          Ok::<_, BoxError>(key * 10)
        }
      }
    })
    .build()
    .unwrap();

  // 1. A miss loads.
  let value = cache.get_async(&5).await.unwrap();
  assert_eq!(value.as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
  assert_eq!(cache.metrics().misses, 1);
  assert_eq!(cache.metrics().inserts, 1);

  // 2. A hit is ready at once.
  let handle = cache.get_async(&5);
  assert!(handle.is_ready());
  assert_eq!(handle.await.unwrap().as_deref(), Some(&50));
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "loader should not be called again");
  assert_eq!(cache.metrics().hits, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_async_loader_thundering_herd() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let num_tasks = 20;

  let cache: Cache<i32, i32> = CacheBuilder::new()
    .entry_capacity(10)
    .async_loader({
      let load_count = load_count.clone();
      move |key: i32| {
        let load_count = load_count.clone();
        async move {
          // Simulate a slow backend call.
          sleep(Duration::from_millis(100)).await;
          load_count.fetch_add(1, Ordering::SeqCst);
          Ok::<_, BoxError>(key + 1)
        }
      }
    })
    .build()
    .unwrap();

  let barrier = Arc::new(Barrier::new(num_tasks));
  let mut tasks = Vec::new();
  for _ in 0..num_tasks {
    let cache = cache.clone();
    let barrier = barrier.clone();
    tasks.push(tokio::spawn(async move {
      barrier.wait().await;
      cache.get_async(&41).await
    }));
  }

  for task in tasks {
    let value = task.await.unwrap().unwrap();
    assert_eq!(value.as_deref(), Some(&42));
  }
  assert_eq!(load_count.load(Ordering::SeqCst), 1, "loader should only be called once");
}

#[tokio::test]
async fn test_async_loader_failure_is_cached() {
  let load_count = Arc::new(AtomicUsize::new(0));
  let cache: Cache<i32, i32> = CacheBuilder::new()
    .entry_capacity(10)
    .async_loader({
      let load_count = load_count.clone();
      move |_: i32| {
        let load_count = load_count.clone();
        async move {
          load_count.fetch_add(1, Ordering::SeqCst);
          Err::<i32, BoxError>("backend down".into())
        }
      }
    })
    .build()
    .unwrap();

  let first = cache.get_async(&1).await.unwrap_err();
  let second = cache.get_async(&1).await.unwrap_err();
  match (first, second) {
    (CacheError::Loader(a), CacheError::Loader(b)) => assert!(a.same_cause(&b)),
    other => panic!("expected loader errors, got {other:?}"),
  }
  assert_eq!(load_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_async_loader_panic_reaches_waiters() {
  let cache: Cache<i32, i32> = CacheBuilder::new()
    .entry_capacity(10)
    .async_loader(|key: i32| async move {
      if key == 0 {
        panic!("async loader blew up");
      }
      Ok::<_, BoxError>(key)
    })
    .build()
    .unwrap();

  assert!(cache.get_async(&0).await.is_err());
  assert!(cache.is_empty(), "a panic is not cached");
  assert_eq!(cache.get_async(&3).await.unwrap().as_deref(), Some(&3));
}

// Runs every future to completion on a fresh thread.
struct ThreadSpawner;

impl TaskSpawner for ThreadSpawner {
  fn spawn(&self, future: Pin<Box<dyn Future<Output = ()> + Send>>) {
    thread::spawn(move || futures_executor::block_on(future));
  }
}

#[test]
fn test_blocking_get_with_custom_spawner() {
  let cache: Cache<i32, String> = CacheBuilder::new()
    .entry_capacity(10)
    .spawner(Arc::new(ThreadSpawner))
    .async_loader(|key: i32| async move { Ok::<_, BoxError>(format!("value-{key}")) })
    .build()
    .unwrap();

  assert_eq!(cache.get(&1).unwrap().as_deref().map(String::as_str), Some("value-1"));
  let handle = cache.get_async(&2);
  assert_eq!(handle.wait().unwrap().as_deref().map(String::as_str), Some("value-2"));
}
