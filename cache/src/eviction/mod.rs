//! Eviction segments and the segmented router in front of them.
//!
//! An `EvictionSegment` owns a disjoint partition of the key space and makes
//! its eviction decisions from its own size and weight counters only. The
//! `SegmentedEviction` routes every entry to exactly one segment.

pub mod clock;
pub mod segmented;

pub use clock::ClockSegment;
pub use segmented::SegmentedEviction;

use crate::entry::CacheEntry;

use std::sync::Arc;

/// The bounds a segment enforces. Negative values mean "no bound".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentBounds {
  pub capacity: i64,
  pub weight: i64,
}

impl SegmentBounds {
  /// Returns `true` if `size` entries of total `weight` exceed these bounds.
  #[inline]
  pub fn exceeded_by(&self, size: u64, weight: u64) -> bool {
    (self.capacity >= 0 && size > self.capacity as u64)
      || (self.weight >= 0 && weight > self.weight as u64)
  }
}

/// Receives the entries a segment evicts.
///
/// Called synchronously from within the segment's own mutation, while the
/// segment is locked. Implementations must not call back into the segment.
pub trait EvictionListener<K, V>: Send + Sync {
  fn on_evicted(&self, entry: &Arc<CacheEntry<K, V>>);
}

/// A logically single-threaded eviction policy over one partition.
///
/// Every call is serialized by the owner. Read hits never reach the segment:
/// they are counted on the entry itself (`CacheEntry::record_hit`), and a
/// segment samples them with `CacheEntry::take_hits` when it picks a victim.
pub trait EvictionSegment<K, V>: Send + Sync {
  /// Starts tracking `entry`. Evicts through the listener if a bound is
  /// exceeded afterwards; the new entry itself may be the victim.
  fn on_insert(&mut self, entry: &Arc<CacheEntry<K, V>>);

  /// Stops tracking `entry`. Unknown entries are ignored.
  fn on_remove(&mut self, entry: &Arc<CacheEntry<K, V>>);

  /// Number of tracked entries.
  fn size(&self) -> u64;

  /// Total weight of tracked entries.
  fn weight(&self) -> u64;

  /// Drops all tracked entries without notifying the listener.
  fn clear(&mut self);
}

/// Creates the segments of a cache.
pub type SegmentFactory<K, V> = Arc<
  dyn Fn(SegmentBounds, Arc<dyn EvictionListener<K, V>>) -> Box<dyn EvictionSegment<K, V>>
    + Send
    + Sync,
>;

/// The default factory, producing `ClockSegment`s.
pub fn clock_segment_factory<K, V>() -> SegmentFactory<K, V>
where
  K: Send + Sync + 'static,
  V: Send + Sync + 'static,
{
  Arc::new(|bounds, listener| Box::new(ClockSegment::new(bounds, listener)))
}
