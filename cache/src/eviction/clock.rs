use super::{EvictionListener, EvictionSegment, SegmentBounds};
use crate::entry::CacheEntry;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use generational_arena::{Arena, Index};

/// An eviction segment based on the Clock (or Second-Chance) algorithm.
///
/// Entries live in a generational arena; the clock face is a ring of arena
/// indices. Removing an entry only frees its arena slot, the stale index is
/// skipped when the hand reaches it. Read hits are recorded on the entry
/// itself and consumed by the hand.
pub struct ClockSegment<K, V> {
  bounds: SegmentBounds,
  listener: Arc<dyn EvictionListener<K, V>>,
  entries: Arena<Arc<CacheEntry<K, V>>>,
  // Entry address to arena slot. Addresses are stable while the arena
  // holds the `Arc`.
  lookup: HashMap<usize, Index>,
  // Front is the hand position.
  ring: VecDeque<Index>,
  weight: u64,
}

impl<K, V> ClockSegment<K, V> {
  pub fn new(bounds: SegmentBounds, listener: Arc<dyn EvictionListener<K, V>>) -> Self {
    Self {
      bounds,
      listener,
      entries: Arena::new(),
      lookup: HashMap::new(),
      ring: VecDeque::new(),
      weight: 0,
    }
  }

  pub fn bounds(&self) -> SegmentBounds {
    self.bounds
  }

  #[inline]
  fn address(entry: &Arc<CacheEntry<K, V>>) -> usize {
    Arc::as_ptr(entry) as usize
  }

  fn detach(&mut self, index: Index) -> Option<Arc<CacheEntry<K, V>>> {
    let entry = self.entries.remove(index)?;
    self.lookup.remove(&Self::address(&entry));
    self.weight = self.weight.saturating_sub(entry.weight());
    Some(entry)
  }

  /// Sweeps the hand until the bounds hold again.
  fn evict_overflow(&mut self) {
    // Every live entry gets at most one second chance per sweep, so the loop
    // terminates even while readers keep hitting entries.
    let mut second_chances = self.entries.len();
    while self.bounds.exceeded_by(self.entries.len() as u64, self.weight) {
      let Some(index) = self.ring.pop_front() else {
        break;
      };
      let referenced = match self.entries.get(index) {
        Some(entry) => entry.take_hits() > 0,
        // Stale slot of a removed entry.
        None => continue,
      };
      if referenced && second_chances > 0 {
        second_chances -= 1;
        self.ring.push_back(index);
        continue;
      }
      if let Some(victim) = self.detach(index) {
        tracing::trace!(segment = victim.segment(), weight = victim.weight(), "evicting entry");
        self.listener.on_evicted(&victim);
      }
    }
    self.compact();
  }

  fn compact(&mut self) {
    if self.ring.len() > self.entries.len() * 2 + 32 {
      let entries = &self.entries;
      self.ring.retain(|index| entries.contains(*index));
    }
  }
}

impl<K, V> EvictionSegment<K, V> for ClockSegment<K, V>
where
  K: Send + Sync,
  V: Send + Sync,
{
  fn on_insert(&mut self, entry: &Arc<CacheEntry<K, V>>) {
    let address = Self::address(entry);
    if self.lookup.contains_key(&address) {
      return;
    }
    let index = self.entries.insert(Arc::clone(entry));
    self.lookup.insert(address, index);
    self.ring.push_back(index);
    self.weight += entry.weight();
    self.evict_overflow();
  }

  fn on_remove(&mut self, entry: &Arc<CacheEntry<K, V>>) {
    if let Some(index) = self.lookup.get(&Self::address(entry)).copied() {
      self.detach(index);
      self.compact();
    }
  }

  fn size(&self) -> u64 {
    self.entries.len() as u64
  }

  fn weight(&self) -> u64 {
    self.weight
  }

  fn clear(&mut self) {
    self.entries.clear();
    self.lookup.clear();
    self.ring.clear();
    self.weight = 0;
  }
}

impl<K, V> fmt::Debug for ClockSegment<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ClockSegment")
      .field("bounds", &self.bounds)
      .field("size", &self.entries.len())
      .field("weight", &self.weight)
      .finish_non_exhaustive()
  }
}
