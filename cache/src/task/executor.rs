use crate::error::DispatchRejected;

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use fibre::mpmc;
use once_cell::sync::Lazy;
use parking_lot::RwLock;

/// A unit of listener work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Default number of queued tasks a `WorkerPool` accepts before rejecting.
pub const DEFAULT_QUEUE_CAPACITY: usize = 4096;

/// Runs listener tasks off the mutating thread.
///
/// `execute` must never block. A full or closed executor rejects the task
/// instead.
pub trait ListenerExecutor: Send + Sync + 'static {
  fn execute(&self, task: Task) -> Result<(), DispatchRejected>;

  /// Stops accepting tasks. Already queued tasks still run.
  fn shutdown(&self) {}
}

/// A fixed-size pool of named worker threads fed by a bounded queue.
pub struct WorkerPool {
  sender: RwLock<Option<mpmc::Sender<Task>>>,
  threads: usize,
  queue_capacity: usize,
}

impl WorkerPool {
  /// Spawns `threads` workers sharing a queue of `queue_capacity` tasks.
  pub fn new(threads: usize, queue_capacity: usize) -> Self {
    let threads = threads.max(1);
    let (tx, rx) = mpmc::bounded::<Task>(queue_capacity.max(1));

    let mut spawned = 0;
    for index in 0..threads {
      let rx = rx.clone();
      let result = thread::Builder::new()
        .name(format!("segcache-listener-{index}"))
        .spawn(move || {
          while let Ok(task) = rx.recv() {
            if catch_unwind(AssertUnwindSafe(task)).is_err() {
              tracing::warn!("listener task panicked");
            }
          }
        });
      match result {
        Ok(_) => spawned += 1,
        Err(error) => tracing::error!(%error, "failed to spawn listener worker"),
      }
    }

    Self {
      sender: RwLock::new(Some(tx)),
      threads: spawned,
      queue_capacity,
    }
  }

  /// A pool with one worker per available CPU.
  pub fn with_default_size() -> Self {
    Self::new(num_cpus::get(), DEFAULT_QUEUE_CAPACITY)
  }

  /// Number of worker threads that were started.
  pub fn threads(&self) -> usize {
    self.threads
  }

  pub fn is_shut_down(&self) -> bool {
    self.sender.read().is_none()
  }
}

impl ListenerExecutor for WorkerPool {
  fn execute(&self, task: Task) -> Result<(), DispatchRejected> {
    let guard = self.sender.read();
    let Some(sender) = guard.as_ref() else {
      return Err(DispatchRejected::ShutDown);
    };
    match sender.try_send(task) {
      Ok(()) => Ok(()),
      Err(fibre::TrySendError::Full(_)) => Err(DispatchRejected::Saturated),
      Err(_) => Err(DispatchRejected::ShutDown),
    }
  }

  fn shutdown(&self) {
    // Dropping the only sender disconnects the queue; workers exit once it
    // is drained.
    self.sender.write().take();
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shutdown();
  }
}

impl fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("threads", &self.threads)
      .field("queue_capacity", &self.queue_capacity)
      .field("shut_down", &self.is_shut_down())
      .finish()
  }
}

static DEFAULT_EXECUTOR: Lazy<Arc<WorkerPool>> =
  Lazy::new(|| Arc::new(WorkerPool::with_default_size()));

/// The process-wide pool shared by every cache that did not supply its own
/// listener executor. It is never shut down by a cache.
pub fn default_listener_executor() -> Arc<dyn ListenerExecutor> {
  DEFAULT_EXECUTOR.clone()
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::mpsc;
  use std::time::Duration;

  #[test]
  fn runs_tasks_and_survives_panics() {
    let pool = WorkerPool::new(2, 16);
    let counter = Arc::new(AtomicUsize::new(0));
    let (done_tx, done_rx) = mpsc::channel();

    pool
      .execute(Box::new(|| {
        panic!("boom");
      }))
      .unwrap();
    for _ in 0..4 {
      let counter = counter.clone();
      let done_tx = done_tx.clone();
      pool
        .execute(Box::new(move || {
          counter.fetch_add(1, Ordering::SeqCst);
          done_tx.send(()).unwrap();
        }))
        .unwrap();
    }
    for _ in 0..4 {
      done_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn rejects_after_shutdown() {
    let pool = WorkerPool::new(1, 4);
    pool.shutdown();
    assert!(pool.is_shut_down());
    assert_eq!(pool.execute(Box::new(|| {})), Err(DispatchRejected::ShutDown));
  }

  #[test]
  fn rejects_when_saturated() {
    let pool = WorkerPool::new(1, 1);
    let (release_tx, release_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    pool
      .execute(Box::new(move || {
        started_tx.send(()).unwrap();
        let _ = release_rx.recv();
      }))
      .unwrap();
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The single worker is blocked; one task fits in the queue.
    pool.execute(Box::new(|| {})).unwrap();
    assert_eq!(pool.execute(Box::new(|| {})), Err(DispatchRejected::Saturated));
    release_tx.send(()).unwrap();
  }
}
