use crate::entry::EntrySnapshot;
use crate::error::{BoxError, CacheError, LoaderError};
use crate::runtime::TaskSpawner;

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread};
use std::time::Instant;

/// The result a load completes with. `Ok(None)` only when nothing can load.
pub type LoadResult<V> = Result<Option<Arc<V>>, CacheError>;

/// Represents a waiter in the queue for a `LoadFuture`.
pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

/// The internal state of a value being loaded.
pub(crate) enum State<V> {
  Computing,
  Complete(LoadResult<V>),
}

pub(crate) struct Inner<V> {
  pub(crate) state: State<V>,
  pub(crate) waiters: VecDeque<Waiter>,
}

/// A load in flight. It can be awaited by multiple sync threads and async
/// tasks simultaneously; all of them observe the same result.
pub(crate) struct LoadFuture<V> {
  pub(crate) inner: Mutex<Inner<V>>,
}

impl<V> LoadFuture<V> {
  /// Creates a new `LoadFuture` in the "Computing" state.
  pub fn new() -> Self {
    Self {
      inner: Mutex::new(Inner {
        state: State::Computing,
        waiters: VecDeque::new(),
      }),
    }
  }

  /// Completes the future, waking all waiters.
  pub fn complete(&self, result: LoadResult<V>) {
    let mut inner = self.inner.lock();
    inner.state = State::Complete(result);
    for waiter in inner.waiters.drain(..) {
      waiter.wake();
    }
  }

  pub fn is_complete(&self) -> bool {
    matches!(self.inner.lock().state, State::Complete(_))
  }

  /// Parks the calling thread until the load completes.
  pub fn wait(&self) -> LoadResult<V> {
    loop {
      {
        let mut inner = self.inner.lock();
        if let State::Complete(result) = &inner.state {
          return result.clone();
        }
        inner.waiters.push_back(Waiter::Sync(thread::current()));
      }
      thread::park();
    }
  }

  fn poll_complete(&self, cx: &mut Context<'_>) -> Poll<LoadResult<V>> {
    let mut inner = self.inner.lock();
    match &inner.state {
      State::Complete(result) => Poll::Ready(result.clone()),
      State::Computing => {
        inner.waiters.push_back(Waiter::Async(cx.waker().clone()));
        Poll::Pending
      }
    }
  }
}

/// The load function the decorated cache calls on a miss.
///
/// Receives the key, the time the load started, and the entry being
/// replaced, if any (for example an expired entry being refreshed).
pub(crate) type AdvancedLoadFn<K, V> =
  Arc<dyn Fn(&K, Instant, Option<&EntrySnapshot<K, V>>) -> Result<V, BoxError> + Send + Sync>;

pub(crate) type AsyncLoadFn<K, V> =
  Arc<dyn Fn(K) -> Pin<Box<dyn Future<Output = Result<V, BoxError>> + Send>> + Send + Sync>;

/// The single active loader role of a cache.
///
/// A simple `load(key)` loader is adapted into `Advanced` when the cache is
/// assembled.
pub(crate) enum Loader<K, V> {
  Advanced(AdvancedLoadFn<K, V>),
  Async {
    load: AsyncLoadFn<K, V>,
    spawner: Arc<dyn TaskSpawner>,
  },
}

impl<K, V> Clone for Loader<K, V> {
  fn clone(&self) -> Self {
    match self {
      Loader::Advanced(f) => Loader::Advanced(f.clone()),
      Loader::Async { load, spawner } => Loader::Async {
        load: load.clone(),
        spawner: spawner.clone(),
      },
    }
  }
}

impl<K, V> fmt::Debug for Loader<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Loader::Advanced(_) => write!(f, "Loader::Advanced"),
      Loader::Async { .. } => write!(f, "Loader::Async"),
    }
  }
}

/// The error waiters observe when a loader panicked. It is not cached.
pub(crate) fn panicked() -> CacheError {
  LoaderError::new("loader panicked".into()).into()
}

/// A pending or completed read of the cache.
///
/// Returned by `get_async`. Await it, or call [`LoadHandle::wait`] from a
/// thread that may block.
pub struct LoadHandle<V> {
  state: HandleState<V>,
}

enum HandleState<V> {
  Ready(LoadResult<V>),
  Pending(Arc<LoadFuture<V>>),
}

impl<V> LoadHandle<V> {
  pub(crate) fn ready(result: LoadResult<V>) -> Self {
    Self {
      state: HandleState::Ready(result),
    }
  }

  pub(crate) fn pending(future: Arc<LoadFuture<V>>) -> Self {
    Self {
      state: HandleState::Pending(future),
    }
  }

  /// Returns `true` if the result is available without waiting.
  pub fn is_ready(&self) -> bool {
    match &self.state {
      HandleState::Ready(_) => true,
      HandleState::Pending(future) => future.is_complete(),
    }
  }

  /// Blocks the calling thread until the result is available.
  ///
  /// Do not call this from an async task on a runtime that must drive the
  /// load itself; await the handle instead.
  pub fn wait(self) -> LoadResult<V> {
    match self.state {
      HandleState::Ready(result) => result,
      HandleState::Pending(future) => future.wait(),
    }
  }
}

impl<V> Future for LoadHandle<V> {
  type Output = LoadResult<V>;

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    match &self.get_mut().state {
      HandleState::Ready(result) => Poll::Ready(result.clone()),
      HandleState::Pending(future) => future.poll_complete(cx),
    }
  }
}

impl<V> fmt::Debug for LoadHandle<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("LoadHandle")
      .field("ready", &self.is_ready())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;

  #[test]
  fn waiters_on_other_threads_observe_the_same_result() {
    let future = Arc::new(LoadFuture::<u32>::new());
    let waiters: Vec<_> = (0..4)
      .map(|_| {
        let future = future.clone();
        thread::spawn(move || future.wait())
      })
      .collect();
    thread::sleep(Duration::from_millis(20));
    future.complete(Ok(Some(Arc::new(42))));
    for waiter in waiters {
      let value = waiter.join().unwrap().unwrap();
      assert_eq!(value.as_deref(), Some(&42));
    }
  }

  #[test]
  fn handle_can_be_awaited() {
    let future = Arc::new(LoadFuture::<u32>::new());
    let handle = LoadHandle::pending(future.clone());
    assert!(!handle.is_ready());
    future.complete(Ok(Some(Arc::new(7))));
    let result = futures_executor::block_on(handle).unwrap();
    assert_eq!(result.as_deref(), Some(&7));
  }
}
