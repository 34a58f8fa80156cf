use crate::entry::{CacheEntry, Stored};
use crate::eviction::{EvictionListener, SegmentFactory, SegmentedEviction};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::plan::SegmentPlan;
use crate::store::ShardedStore;
use crate::time;

use std::collections::VecDeque;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

const ITER_BATCH_SIZE: usize = 64;

type EntryRef<K, V> = Arc<CacheEntry<K, V>>;
type EvictedBuffers<K, V> = Arc<[Mutex<Vec<EntryRef<K, V>>>]>;

/// The state of a key as observed by one lookup.
pub(crate) enum Slot<K, V> {
  Fresh(EntryRef<K, V>),
  Expired(EntryRef<K, V>),
  Vacant,
}

/// The outcome of one committed write.
pub(crate) struct Commit<K, V> {
  pub(crate) entry: EntryRef<K, V>,
  /// The fresh entry this write replaced.
  pub(crate) replaced: Option<EntryRef<K, V>>,
  /// The expired entry this write replaced. Counts as absent.
  pub(crate) expired: Option<EntryRef<K, V>>,
  /// Entries the owning segment evicted to make room, possibly `entry`.
  pub(crate) evicted: Vec<EntryRef<K, V>>,
}

/// Removes evicted entries from the map and parks them until the mutating
/// thread has released its segment lock.
struct StoreEvictionListener<K, V, H> {
  store: Arc<ShardedStore<K, V, H>>,
  evicted: EvictedBuffers<K, V>,
}

impl<K, V, H> EvictionListener<K, V> for StoreEvictionListener<K, V, H>
where
  K: Eq + Hash + Send + Sync,
  V: Send + Sync,
  H: BuildHasher + Clone + Send + Sync,
{
  fn on_evicted(&self, entry: &EntryRef<K, V>) {
    if self.store.remove_if_same(entry) {
      self.evicted[entry.segment()].lock().push(Arc::clone(entry));
    }
  }
}

/// The bare concurrent cache: a sharded map plus segmented eviction.
///
/// It knows nothing about loaders, writers or listeners. Capacity-driven
/// eviction happens synchronously inside the `put` that exceeded a segment
/// bound.
pub struct CoreCache<K, V, H = ahash::RandomState> {
  name: String,
  store: Arc<ShardedStore<K, V, H>>,
  eviction: SegmentedEviction<K, V>,
  evicted: EvictedBuffers<K, V>,
  metrics: Arc<Metrics>,
  time_to_live: Option<Duration>,
  plan: SegmentPlan,
}

impl<K, V, H> fmt::Debug for CoreCache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CoreCache")
      .field("name", &self.name)
      .field("plan", &self.plan)
      .field("time_to_live", &self.time_to_live)
      .field("store", &self.store)
      .field("eviction", &self.eviction)
      .finish_non_exhaustive()
  }
}

impl<K, V, H> CoreCache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  pub(crate) fn new(
    name: String,
    plan: SegmentPlan,
    shards: usize,
    hasher: H,
    factory: &SegmentFactory<K, V>,
    time_to_live: Option<Duration>,
  ) -> Self {
    let store = Arc::new(ShardedStore::new(shards, hasher));
    let evicted: EvictedBuffers<K, V> = (0..plan.segment_count)
      .map(|_| Mutex::new(Vec::new()))
      .collect::<Vec<_>>()
      .into();
    let listener = Arc::new(StoreEvictionListener {
      store: Arc::clone(&store),
      evicted: Arc::clone(&evicted),
    });
    let eviction = SegmentedEviction::new(&plan, factory, listener);

    Self {
      name,
      store,
      eviction,
      evicted,
      metrics: Arc::new(Metrics::new()),
      time_to_live,
      plan,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// The segment plan this cache was assembled with.
  pub fn plan(&self) -> &SegmentPlan {
    &self.plan
  }

  pub fn segment_count(&self) -> usize {
    self.eviction.segment_count()
  }

  /// Looks up a value, recording a hit or a miss.
  ///
  /// An expired entry is removed on the way and reported as a miss.
  pub fn get(&self, key: &K) -> Option<Arc<V>> {
    match self.probe(key) {
      Slot::Fresh(entry) => match entry.value() {
        Some(value) => {
          self.touch(&entry);
          Some(Arc::clone(value))
        }
        None => {
          Metrics::incr(&self.metrics.misses);
          None
        }
      },
      Slot::Expired(entry) => {
        self.expire(&entry);
        Metrics::incr(&self.metrics.misses);
        None
      }
      Slot::Vacant => {
        Metrics::incr(&self.metrics.misses);
        None
      }
    }
  }

  /// Looks up a fresh value without recording an access.
  pub fn peek(&self, key: &K) -> Option<Arc<V>> {
    match self.probe(key) {
      Slot::Fresh(entry) => entry.value().cloned(),
      _ => None,
    }
  }

  /// Returns `true` if `key` maps to a fresh value.
  pub fn contains_key(&self, key: &K) -> bool {
    self.peek(key).is_some()
  }

  /// Inserts a value with weight 1.
  pub fn put(&self, key: K, value: V) {
    self.put_weighted(key, value, 1);
  }

  /// Inserts a value counting `weight` against its segment's weight bound.
  pub fn put_weighted(&self, key: K, value: V, weight: u64) {
    let expires_at = self.default_expiry();
    self.commit(key, Stored::Value(Arc::new(value)), weight, expires_at);
  }

  /// Removes a key. Returns `true` if a fresh entry was removed.
  pub fn remove(&self, key: &K) -> bool {
    matches!(self.remove_entry(key), Slot::Fresh(_))
  }

  /// Removes every entry. No eviction or expiry is reported.
  pub fn clear(&self) {
    // Segment locks in index order, then shard locks.
    let mut segments = (0..self.eviction.segment_count())
      .map(|index| self.eviction.lock(index))
      .collect::<Vec<_>>();
    for shard in self.store.iter_shards() {
      shard.write().clear();
    }
    for segment in segments.iter_mut() {
      segment.clear();
    }
    drop(segments);
    for buffer in self.evicted.iter() {
      buffer.lock().clear();
    }
  }

  /// Removes every expired entry. Returns the number of entries removed.
  pub fn purge_expired(&self) -> usize {
    self.purge_expired_entries().len()
  }

  /// Number of entries, summed segment by segment.
  pub fn len(&self) -> usize {
    self.eviction.aggregate_size() as usize
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Total weight, summed segment by segment.
  pub fn weight(&self) -> u64 {
    self.eviction.aggregate_weight()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self
      .metrics
      .snapshot(self.eviction.aggregate_size(), self.eviction.aggregate_weight())
  }

  /// A weakly consistent iterator over fresh values.
  ///
  /// Only one shard is read-locked at a time, briefly. Entries written to a
  /// shard after it was scanned are missed.
  pub fn iter(&self) -> Iter<'_, K, V, H> {
    Iter {
      store: &self.store,
      buffer: VecDeque::with_capacity(ITER_BATCH_SIZE),
      shard_index: 0,
      seen_in_shard: 0,
    }
  }

  // --- Crate-internal primitives used by the decorator ---

  pub(crate) fn metrics_ref(&self) -> &Arc<Metrics> {
    &self.metrics
  }

  fn default_expiry(&self) -> u64 {
    self.time_to_live.map_or(time::ETERNAL, time::expires_after)
  }

  /// Classifies the current entry of `key`. Takes only a shard read lock.
  pub(crate) fn probe(&self, key: &K) -> Slot<K, V> {
    let hash = self.store.hash(key);
    let entry = self.store.shard(hash).read().get(key).cloned();
    match entry {
      Some(entry) if entry.is_expired() => Slot::Expired(entry),
      Some(entry) => Slot::Fresh(entry),
      None => Slot::Vacant,
    }
  }

  /// Records a read hit on a fresh entry.
  pub(crate) fn touch(&self, entry: &EntryRef<K, V>) {
    self.eviction.on_access(entry);
    Metrics::incr(&self.metrics.hits);
  }

  pub(crate) fn record_miss(&self) {
    Metrics::incr(&self.metrics.misses);
  }

  /// Writes an entry under its segment's lock and lets the segment evict.
  pub(crate) fn commit(&self, key: K, stored: Stored<V>, weight: u64, expires_at: u64) -> Commit<K, V> {
    let hash = self.store.hash(&key);
    let segment = self.eviction.route(hash);
    let entry = Arc::new(CacheEntry::new(
      key.clone(),
      stored,
      hash,
      weight,
      segment,
      expires_at,
    ));

    let mut guard = self.eviction.lock(segment);
    let old = self.store.shard(hash).write().insert(key, Arc::clone(&entry));
    if let Some(old) = &old {
      guard.on_remove(old);
    }
    guard.on_insert(&entry);
    let evicted = std::mem::take(&mut *self.evicted[segment].lock());
    drop(guard);

    let (replaced, expired) = match old {
      Some(old) if old.is_expired() => (None, Some(old)),
      Some(old) => (Some(old), None),
      None => (None, None),
    };
    if replaced.is_some() {
      Metrics::incr(&self.metrics.updates);
    } else {
      Metrics::incr(&self.metrics.inserts);
    }
    if expired.is_some() {
      Metrics::incr(&self.metrics.expirations);
    }
    if !evicted.is_empty() {
      self
        .metrics
        .evictions
        .fetch_add(evicted.len() as u64, Ordering::Relaxed);
    }

    Commit {
      entry,
      replaced,
      expired,
      evicted,
    }
  }

  /// Removes the current entry of `key`, reporting whether it was fresh.
  pub(crate) fn remove_entry(&self, key: &K) -> Slot<K, V> {
    let hash = self.store.hash(key);
    let segment = self.eviction.route(hash);
    let mut guard = self.eviction.lock(segment);
    let old = self.store.shard(hash).write().remove(key);
    let Some(old) = old else {
      return Slot::Vacant;
    };
    guard.on_remove(&old);
    drop(guard);

    if old.is_expired() {
      Metrics::incr(&self.metrics.expirations);
      Slot::Expired(old)
    } else {
      Metrics::incr(&self.metrics.removals);
      Slot::Fresh(old)
    }
  }

  /// Removes `entry` if it is still the current entry of its key.
  pub(crate) fn expire(&self, entry: &EntryRef<K, V>) -> bool {
    let mut guard = self.eviction.lock(entry.segment());
    if !self.store.remove_if_same(entry) {
      return false;
    }
    guard.on_remove(entry);
    drop(guard);
    Metrics::incr(&self.metrics.expirations);
    true
  }

  pub(crate) fn purge_expired_entries(&self) -> Vec<EntryRef<K, V>> {
    let now = time::now_nanos();
    let mut candidates = Vec::new();
    for shard in self.store.iter_shards() {
      let guard = shard.read();
      candidates.extend(
        guard
          .values()
          .filter(|entry| entry.is_expired_at(now))
          .cloned(),
      );
    }
    candidates.retain(|entry| self.expire(entry));
    candidates
  }
}

/// A weakly consistent iterator over the fresh values of a cache.
///
/// Cached loader failures and expired entries are skipped.
pub struct Iter<'a, K, V, H> {
  store: &'a ShardedStore<K, V, H>,
  buffer: VecDeque<(K, Arc<V>)>,
  shard_index: usize,
  seen_in_shard: usize,
}

impl<'a, K, V, H> Iter<'a, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  fn refill_buffer(&mut self) {
    let now = time::now_nanos();
    let store = self.store;

    while self.shard_index < store.num_shards() && self.buffer.len() < ITER_BATCH_SIZE {
      let guard = store.shard_at(self.shard_index).read();
      if self.seen_in_shard >= guard.len() {
        self.shard_index += 1;
        self.seen_in_shard = 0;
        continue;
      }

      let wanted = ITER_BATCH_SIZE - self.buffer.len();
      let mut scanned = 0;
      for (key, entry) in guard.iter().skip(self.seen_in_shard).take(wanted) {
        scanned += 1;
        if entry.is_expired_at(now) {
          continue;
        }
        if let Some(value) = entry.value() {
          self.buffer.push_back((key.clone(), Arc::clone(value)));
        }
      }
      self.seen_in_shard += scanned;
    } // Lock on shard is released here
  }
}

impl<'a, K, V, H> Iterator for Iter<'a, K, V, H>
where
  K: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  type Item = (K, Arc<V>);

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(item) = self.buffer.pop_front() {
      return Some(item);
    }
    if self.shard_index >= self.store.num_shards() {
      return None;
    }
    self.refill_buffer();
    self.buffer.pop_front()
  }
}
