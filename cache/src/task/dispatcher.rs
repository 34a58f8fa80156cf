//! Per-key ordered delivery of listener events on a shared executor.

use crate::metrics::Metrics;
use crate::task::executor::ListenerExecutor;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::Mutex;

pub(crate) type Thunk = Box<dyn FnOnce() + Send + 'static>;

/// One listener invocation waiting for delivery.
pub(crate) struct QueuedEvent<K> {
  pub(crate) key: K,
  pub(crate) thunk: Thunk,
}

type KeyQueues<K> = Mutex<HashMap<K, VecDeque<Thunk>, ahash::RandomState>>;

struct Inner<K> {
  cache: String,
  // A key is present exactly while a runner task for it is submitted or
  // running. The runner removes it once its queue is empty.
  queues: Box<[CachePadded<KeyQueues<K>>]>,
  hasher: ahash::RandomState,
  executor: Arc<dyn ListenerExecutor>,
  metrics: Arc<Metrics>,
}

/// Delivers events for the same key in enqueue order, never two at once,
/// while events for different keys run in parallel.
pub(crate) struct AsyncEventDispatcher<K> {
  inner: Arc<Inner<K>>,
}

impl<K> AsyncEventDispatcher<K>
where
  K: Eq + Hash + Clone + Send + 'static,
{
  pub(crate) fn new(cache: String, executor: Arc<dyn ListenerExecutor>, metrics: Arc<Metrics>) -> Self {
    let shards = (num_cpus::get() * 2).next_power_of_two();
    let hasher = ahash::RandomState::new();
    let queues = (0..shards)
      .map(|_| CachePadded::new(Mutex::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      inner: Arc::new(Inner {
        cache,
        queues,
        hasher,
        executor,
        metrics,
      }),
    }
  }

  /// Schedules `event`. Never blocks and never fails the caller; a rejection
  /// by the executor is logged and counted.
  pub(crate) fn queue(&self, event: QueuedEvent<K>) {
    let QueuedEvent { key, thunk } = event;
    let shard = self.inner.shard(&key);
    {
      let mut queues = shard.lock();
      if let Some(pending) = queues.get_mut(&key) {
        pending.push_back(thunk);
        return;
      }
      queues.insert(key.clone(), VecDeque::from([thunk]));
    }

    let inner = Arc::clone(&self.inner);
    let runner_key = key.clone();
    if let Err(error) = self.inner.executor.execute(Box::new(move || inner.run(runner_key))) {
      // Nothing will drain this key; drop what is queued for it, including
      // events other threads appended after the key was claimed.
      let dropped = shard.lock().remove(&key).map_or(0, |pending| pending.len());
      Metrics::add(&self.inner.metrics.dispatch_rejections, dropped as u64);
      tracing::error!(cache = %self.inner.cache, %error, dropped, "listener event rejected");
    }
  }
}

impl<K> Inner<K>
where
  K: Eq + Hash,
{
  fn shard(&self, key: &K) -> &KeyQueues<K> {
    let index = self.hasher.hash_one(key) as usize & (self.queues.len() - 1);
    &self.queues[index]
  }

  fn run(&self, key: K) {
    let shard = self.shard(&key);
    loop {
      let thunk = {
        let mut queues = shard.lock();
        let Some(pending) = queues.get_mut(&key) else {
          return;
        };
        match pending.pop_front() {
          Some(thunk) => thunk,
          None => {
            queues.remove(&key);
            return;
          }
        }
      };
      if catch_unwind(AssertUnwindSafe(thunk)).is_err() {
        tracing::warn!(cache = %self.cache, "async listener panicked");
      }
    }
  }
}

impl<K> fmt::Debug for AsyncEventDispatcher<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncEventDispatcher")
      .field("cache", &self.inner.cache)
      .field("shards", &self.inner.queues.len())
      .finish_non_exhaustive()
  }
}
