use crate::core::{Commit, CoreCache, Slot};
use crate::entry::{CacheEntry, EntrySnapshot, Stored};
use crate::error::{BoxError, CacheError, LoaderError, WriterError};
use crate::expiry::ExpiryRule;
use crate::listener::{EventKind, ListenerSet};
use crate::loader::{panicked, LoadFuture, LoadHandle, LoadResult, Loader};
use crate::metrics::Metrics;
use crate::task::dispatcher::AsyncEventDispatcher;
use crate::task::executor::ListenerExecutor;
use crate::writer::CacheWriter;

use std::collections::HashMap;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use futures_util::FutureExt;
use parking_lot::Mutex;

type EntryRef<K, V> = Arc<CacheEntry<K, V>>;
type PendingLoads<K, V> = Mutex<HashMap<K, Arc<LoadFuture<V>>, ahash::RandomState>>;

pub(crate) type Weigher<K, V> = Arc<dyn Fn(&K, &V) -> u64 + Send + Sync>;

/// A `CoreCache` composed with loader, writer, listeners, weigher and
/// expiry policy.
///
/// Built only when at least one of those is configured. The composition is
/// fixed at assembly time.
pub struct DecoratedCache<K, V, H = ahash::RandomState> {
  pub(crate) core: CoreCache<K, V, H>,
  pub(crate) listeners: ListenerSet<K, V>,
  pub(crate) loader: Option<Loader<K, V>>,
  pub(crate) writer: Option<Arc<dyn CacheWriter<K, V>>>,
  pub(crate) weigher: Option<Weigher<K, V>>,
  pub(crate) expiry: ExpiryRule<K, V>,
  pub(crate) refresh_ahead: bool,
  pub(crate) pending: Box<[PendingLoads<K, V>]>,
  pub(crate) pending_hasher: ahash::RandomState,
  pub(crate) dispatcher: Option<Arc<AsyncEventDispatcher<K>>>,
  /// An executor this cache shuts down when it is dropped.
  pub(crate) owned_executor: Option<Arc<dyn ListenerExecutor>>,
}

impl<K, V, H> fmt::Debug for DecoratedCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("DecoratedCache")
      .field("core", &self.core)
      .field("loader", &self.loader)
      .field("has_writer", &self.writer.is_some())
      .field("has_weigher", &self.weigher.is_some())
      .field("expiry", &self.expiry)
      .field("refresh_ahead", &self.refresh_ahead)
      .field("dispatcher", &self.dispatcher)
      .finish_non_exhaustive()
  }
}

impl<K, V, H> Drop for DecoratedCache<K, V, H> {
  fn drop(&mut self) {
    if let Some(executor) = self.owned_executor.take() {
      executor.shutdown();
    }
  }
}

impl<K, V, H> DecoratedCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn pending_table(shards: usize) -> (Box<[PendingLoads<K, V>]>, ahash::RandomState) {
    let hasher = ahash::RandomState::new();
    let table = (0..shards.max(1).next_power_of_two())
      .map(|_| Mutex::new(HashMap::with_hasher(hasher.clone())))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    (table, hasher)
  }

  pub fn core(&self) -> &CoreCache<K, V, H> {
    &self.core
  }

  /// Looks up `key`, loading it on a miss if a loader is configured.
  ///
  /// A cached loader failure is returned as `Err` on every read within its
  /// freshness window. With refresh-ahead, an expired value is returned as
  /// is while a reload runs in the background.
  pub fn get(self: &Arc<Self>, key: &K) -> LoadResult<V> {
    let current = match self.core.probe(key) {
      Slot::Fresh(entry) => {
        self.core.touch(&entry);
        return surface(&entry);
      }
      Slot::Expired(entry) => match self.serve_stale(&entry) {
        Some(stale) => return Ok(Some(stale)),
        None => Some(entry),
      },
      Slot::Vacant => None,
    };
    self.core.record_miss();
    if self.loader.is_none() {
      return Ok(None);
    }
    self.load_shared(key, current).wait()
  }

  /// Like `get`, but an async loader is not waited for.
  pub fn get_async(self: &Arc<Self>, key: &K) -> LoadHandle<V> {
    let current = match self.core.probe(key) {
      Slot::Fresh(entry) => {
        self.core.touch(&entry);
        return LoadHandle::ready(surface(&entry));
      }
      Slot::Expired(entry) => match self.serve_stale(&entry) {
        Some(stale) => return LoadHandle::ready(Ok(Some(stale))),
        None => Some(entry),
      },
      Slot::Vacant => None,
    };
    self.core.record_miss();
    if self.loader.is_none() {
      return LoadHandle::ready(Ok(None));
    }
    LoadHandle::pending(self.load_shared(key, current))
  }

  /// Looks up a fresh value. Never loads and records no access.
  pub fn peek(&self, key: &K) -> Option<Arc<V>> {
    self.core.peek(key)
  }

  /// Writes `value` through the writer, then stores it.
  ///
  /// If the writer fails, nothing is stored and no event fires.
  pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    let value = Arc::new(value);
    self.write_through(&key, &value)?;
    self.store_value(key, value, Instant::now(), false);
    Ok(())
  }

  /// Deletes through the writer, then removes `key`.
  ///
  /// Returns `true` if a fresh value was removed.
  pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
    if let Some(writer) = &self.writer {
      writer.delete(key).map_err(WriterError::new)?;
    }
    match self.core.remove_entry(key) {
      Slot::Fresh(old) if old.value().is_some() => {
        if self.listeners.has(EventKind::Removed) {
          self.listeners.fire_removed(&EntrySnapshot(old));
        }
        Ok(true)
      }
      Slot::Expired(old) => {
        self.publish_expired(old);
        Ok(false)
      }
      _ => Ok(false),
    }
  }

  /// Removes every expired entry, firing `expired` for each value.
  pub fn purge_expired(&self) -> usize {
    let purged = self.core.purge_expired_entries();
    let count = purged.len();
    for entry in purged {
      self.publish_expired(entry);
    }
    count
  }

  // --- Read helpers ---

  /// Returns the stale value when refresh-ahead applies, after scheduling a
  /// reload. Otherwise expires the entry.
  fn serve_stale(self: &Arc<Self>, entry: &EntryRef<K, V>) -> Option<Arc<V>> {
    if self.refresh_ahead && self.loader.is_some() {
      if let Some(stale) = entry.value() {
        self.core.touch(entry);
        self.refresh(Arc::clone(entry));
        return Some(Arc::clone(stale));
      }
    }
    if self.core.expire(entry) {
      self.publish_expired(Arc::clone(entry));
    }
    None
  }

  fn refresh(self: &Arc<Self>, stale: EntryRef<K, V>) {
    let key = stale.key().clone();
    let Some((future, true)) = self.join_or_lead(&key) else {
      return;
    };
    match &self.loader {
      Some(Loader::Advanced(_)) => {
        let this = Arc::clone(self);
        thread::spawn(move || this.run_load(key, future, Some(stale), true));
      }
      Some(Loader::Async { .. }) => self.spawn_async_load(key, future, Some(stale), true),
      None => self.finish_pending(&key, &future, Ok(None)),
    }
  }

  // --- Loading ---

  /// Joins the load of `key` in flight, or starts one.
  fn load_shared(self: &Arc<Self>, key: &K, current: Option<EntryRef<K, V>>) -> Arc<LoadFuture<V>> {
    let Some((future, leader)) = self.join_or_lead(key) else {
      return completed(Ok(None));
    };
    if !leader {
      return future;
    }
    // Another leader may have finished between our miss and now.
    if let Slot::Fresh(entry) = self.core.probe(key) {
      self.finish_pending(key, &future, surface(&entry));
      return future;
    }
    match &self.loader {
      Some(Loader::Advanced(_)) => self.run_load(key.clone(), Arc::clone(&future), current, false),
      Some(Loader::Async { .. }) => self.spawn_async_load(key.clone(), Arc::clone(&future), current, false),
      None => self.finish_pending(key, &future, Ok(None)),
    }
    future
  }

  fn pending_shard(&self, key: &K) -> &PendingLoads<K, V> {
    let index = self.pending_hasher.hash_one(key) as usize & (self.pending.len() - 1);
    &self.pending[index]
  }

  /// Returns the pending load of `key` and whether the caller leads it.
  fn join_or_lead(&self, key: &K) -> Option<(Arc<LoadFuture<V>>, bool)> {
    self.loader.as_ref()?;
    let mut pending = self.pending_shard(key).lock();
    if let Some(future) = pending.get(key) {
      return Some((Arc::clone(future), false));
    }
    let future = Arc::new(LoadFuture::new());
    pending.insert(key.clone(), Arc::clone(&future));
    Some((future, true))
  }

  fn finish_pending(&self, key: &K, future: &Arc<LoadFuture<V>>, result: LoadResult<V>) {
    {
      let mut pending = self.pending_shard(key).lock();
      if pending.get(key).is_some_and(|current| Arc::ptr_eq(current, future)) {
        pending.remove(key);
      }
    }
    future.complete(result);
  }

  /// Runs the synchronous loader on the current thread.
  fn run_load(&self, key: K, future: Arc<LoadFuture<V>>, current: Option<EntryRef<K, V>>, refresh: bool) {
    let Some(Loader::Advanced(load)) = &self.loader else {
      return;
    };
    let start = Instant::now();
    Metrics::incr(&self.core.metrics_ref().loads);
    tracing::trace!(cache = %self.core.name(), refresh, "invoking loader");

    let snapshot = current.clone().map(EntrySnapshot);
    match catch_unwind(AssertUnwindSafe(|| load(&key, start, snapshot.as_ref()))) {
      Ok(outcome) => {
        let result = self.finish_load(key.clone(), outcome, start, current, refresh);
        self.finish_pending(&key, &future, result);
      }
      Err(panic) => {
        self.finish_pending(&key, &future, Err(panicked()));
        resume_unwind(panic);
      }
    }
  }

  fn spawn_async_load(
    self: &Arc<Self>,
    key: K,
    future: Arc<LoadFuture<V>>,
    current: Option<EntryRef<K, V>>,
    refresh: bool,
  ) {
    let Some(Loader::Async { load, spawner }) = &self.loader else {
      return;
    };
    let start = Instant::now();
    Metrics::incr(&self.core.metrics_ref().loads);
    tracing::trace!(cache = %self.core.name(), refresh, "spawning async loader");

    let loading = load(key.clone());
    let this = Arc::clone(self);
    spawner.spawn(Box::pin(async move {
      let result = match AssertUnwindSafe(loading).catch_unwind().await {
        Ok(outcome) => this.finish_load(key.clone(), outcome, start, current, refresh),
        Err(_) => {
          tracing::warn!(cache = %this.core.name(), "async loader panicked");
          Err(panicked())
        }
      };
      this.finish_pending(&key, &future, result);
    }));
  }

  /// Installs the outcome of a load.
  ///
  /// A value goes through the writer and is stored. A failure is cached in
  /// place of a value, except for a failed refresh, which expires the stale
  /// entry instead.
  fn finish_load(
    &self,
    key: K,
    outcome: Result<V, BoxError>,
    start: Instant,
    current: Option<EntryRef<K, V>>,
    refresh: bool,
  ) -> LoadResult<V> {
    match outcome {
      Ok(value) => {
        let value = Arc::new(value);
        self.write_through(&key, &value)?;
        self.store_value(key, Arc::clone(&value), start, refresh);
        Ok(Some(value))
      }
      Err(cause) => {
        Metrics::incr(&self.core.metrics_ref().load_failures);
        let error = LoaderError::new(cause);
        tracing::trace!(cache = %self.core.name(), %error, refresh, "loader failed");
        match current {
          Some(stale) if refresh => {
            if self.core.expire(&stale) {
              self.publish_expired(stale);
            }
          }
          _ => {
            let expires_at = self.expiry.expires_at(&key, Err(&error), start);
            let commit = self.core.commit(key, Stored::Failure(error.clone()), 1, expires_at);
            self.publish_evicted(commit.evicted);
          }
        }
        Err(error.into())
      }
    }
  }

  // --- Writing and events ---

  fn write_through(&self, key: &K, value: &Arc<V>) -> Result<(), WriterError> {
    match &self.writer {
      Some(writer) => writer.write(key, value).map_err(WriterError::new),
      None => Ok(()),
    }
  }

  fn store_value(&self, key: K, value: Arc<V>, now: Instant, refresh: bool) {
    let weight = self.weigher.as_ref().map_or(1, |weigher| weigher(&key, &value));
    let expires_at = self.expiry.expires_at(&key, Ok(&value), now);
    let commit = self.core.commit(key, Stored::Value(value), weight, expires_at);
    self.publish(commit, refresh);
  }

  /// Fires the events of a committed value write.
  ///
  /// Runs after all locks are released. A refresh that replaced its stale
  /// entry is reported as an update.
  fn publish(&self, commit: Commit<K, V>, refresh: bool) {
    let Commit {
      entry,
      replaced,
      expired,
      evicted,
    } = commit;
    let new = EntrySnapshot(entry);
    let previous = match (replaced, expired) {
      (Some(old), _) => Some(old),
      (None, Some(stale)) if refresh => Some(stale),
      (None, Some(stale)) => {
        self.publish_expired(stale);
        None
      }
      (None, None) => None,
    };
    match previous.filter(|old| old.value().is_some()) {
      Some(old) => self.listeners.fire_updated(&EntrySnapshot(old), &new),
      None => self.listeners.fire_created(&new),
    }
    self.publish_evicted(evicted);
  }

  fn publish_expired(&self, entry: EntryRef<K, V>) {
    if entry.value().is_some() && self.listeners.has(EventKind::Expired) {
      self.listeners.fire_expired(&EntrySnapshot(entry));
    }
  }

  fn publish_evicted(&self, evicted: Vec<EntryRef<K, V>>) {
    for entry in evicted {
      tracing::trace!(cache = %self.core.name(), segment = entry.segment(), "entry evicted");
      if entry.value().is_some() {
        self.listeners.fire_evicted(&EntrySnapshot(entry));
      }
    }
  }
}

fn surface<K, V>(entry: &EntryRef<K, V>) -> LoadResult<V> {
  match entry.stored() {
    Stored::Value(value) => Ok(Some(Arc::clone(value))),
    Stored::Failure(error) => Err(error.clone().into()),
  }
}

fn completed<V>(result: LoadResult<V>) -> Arc<LoadFuture<V>> {
  let future = Arc::new(LoadFuture::new());
  future.complete(result);
  future
}
