use super::{EvictionListener, EvictionSegment, SegmentBounds, SegmentFactory};
use crate::entry::CacheEntry;
use crate::plan::SegmentPlan;

use std::fmt;
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::{RwLock, RwLockWriteGuard};

type Segment<K, V> = Box<dyn EvictionSegment<K, V>>;

/// Routes entries to a fixed set of independently locked eviction segments.
///
/// The segment of an entry is the low bits of its key hash, so the same key
/// always lands in the same segment. With a single segment no hash bits are
/// consumed at all.
pub struct SegmentedEviction<K, V> {
  segments: Box<[CachePadded<RwLock<Segment<K, V>>>]>,
  mask: u64,
}

impl<K, V> SegmentedEviction<K, V> {
  /// Creates one segment per `plan.segment_count`, each with the per-segment
  /// bounds of the plan.
  pub fn new(
    plan: &SegmentPlan,
    factory: &SegmentFactory<K, V>,
    listener: Arc<dyn EvictionListener<K, V>>,
  ) -> Self {
    debug_assert!(plan.segment_count.is_power_of_two());
    let bounds = SegmentBounds {
      capacity: plan.per_segment_capacity,
      weight: plan.per_segment_weight,
    };
    let segments = (0..plan.segment_count)
      .map(|_| CachePadded::new(RwLock::new(factory(bounds, Arc::clone(&listener)))))
      .collect::<Vec<_>>()
      .into_boxed_slice();
    Self {
      mask: plan.segment_count as u64 - 1,
      segments,
    }
  }

  /// The index of the segment owning `hash`.
  #[inline]
  pub fn route(&self, hash: u64) -> usize {
    if self.segments.len() == 1 {
      0
    } else {
      (hash & self.mask) as usize
    }
  }

  #[inline]
  pub fn segment_count(&self) -> usize {
    self.segments.len()
  }

  /// Locks a segment for a structural change.
  #[inline]
  pub(crate) fn lock(&self, index: usize) -> RwLockWriteGuard<'_, Segment<K, V>> {
    self.segments[index].write()
  }

  pub fn on_insert(&self, entry: &Arc<CacheEntry<K, V>>) {
    self.lock(entry.segment()).on_insert(entry);
  }

  /// Records a read hit without taking the segment lock.
  #[inline]
  pub fn on_access(&self, entry: &Arc<CacheEntry<K, V>>) {
    entry.record_hit();
  }

  pub fn on_remove(&self, entry: &Arc<CacheEntry<K, V>>) {
    self.lock(entry.segment()).on_remove(entry);
  }

  /// Sum of the segment sizes. Not an atomic snapshot.
  pub fn aggregate_size(&self) -> u64 {
    self.segments.iter().map(|s| s.read().size()).sum()
  }

  /// Sum of the segment weights. Not an atomic snapshot.
  pub fn aggregate_weight(&self) -> u64 {
    self.segments.iter().map(|s| s.read().weight()).sum()
  }
}

impl<K, V> fmt::Debug for SegmentedEviction<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SegmentedEviction")
      .field("segments", &self.segments.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::eviction::clock_segment_factory;
  use crate::plan::{PlanInput, UNBOUNDED};

  struct Ignore;

  impl EvictionListener<u64, u64> for Ignore {
    fn on_evicted(&self, _: &Arc<CacheEntry<u64, u64>>) {}
  }

  fn eviction(segment_count_override: usize) -> SegmentedEviction<u64, u64> {
    let plan = SegmentPlan::compute(PlanInput {
      entry_capacity: 100_000,
      maximum_weight: UNBOUNDED,
      strict_eviction: false,
      boost_concurrency: false,
      available_processors: 4,
      segment_count_override,
    });
    SegmentedEviction::new(&plan, &clock_segment_factory(), Arc::new(Ignore))
  }

  #[test]
  fn single_segment_routes_everything_to_zero() {
    let plan = SegmentPlan::compute(PlanInput {
      entry_capacity: 10,
      maximum_weight: UNBOUNDED,
      strict_eviction: false,
      boost_concurrency: false,
      available_processors: 8,
      segment_count_override: 0,
    });
    let eviction: SegmentedEviction<u64, u64> =
      SegmentedEviction::new(&plan, &clock_segment_factory(), Arc::new(Ignore));
    assert_eq!(eviction.segment_count(), 1);
    assert!((0..64).all(|h| eviction.route(h * 7919) == 0));
  }

  #[test]
  fn routing_uses_low_hash_bits() {
    let eviction = eviction(4);
    assert_eq!(eviction.segment_count(), 4);
    assert_eq!(eviction.route(0b1001), 1);
    assert_eq!(eviction.route(0b1110), 2);
    assert_eq!(eviction.route(u64::MAX), 3);
  }

  #[test]
  fn access_does_not_take_the_segment_lock() {
    let eviction = eviction(2);
    let entry = Arc::new(CacheEntry::new(
      4,
      crate::entry::Stored::Value(Arc::new(4)),
      4,
      1,
      eviction.route(4),
      crate::time::ETERNAL,
    ));
    eviction.on_insert(&entry);
    let _guard = eviction.lock(entry.segment());
    eviction.on_access(&entry);
    eviction.on_access(&entry);
    assert_eq!(entry.take_hits(), 2);
  }

  #[test]
  fn aggregates_sum_segments() {
    let eviction = eviction(2);
    for key in 0..10u64 {
      let segment = eviction.route(key);
      let entry = Arc::new(CacheEntry::new(
        key,
        crate::entry::Stored::Value(Arc::new(key)),
        key,
        3,
        segment,
        crate::time::ETERNAL,
      ));
      eviction.on_insert(&entry);
    }
    assert_eq!(eviction.aggregate_size(), 10);
    assert_eq!(eviction.aggregate_weight(), 30);
  }
}
