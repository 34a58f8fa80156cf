use crate::entry::CacheEntry;

use std::fmt;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use crossbeam_utils::CachePadded;
use parking_lot::RwLock;

pub(crate) type Shard<K, V, H> = RwLock<HashMap<K, Arc<CacheEntry<K, V>>, H>>;

/// A map that is partitioned into multiple, independently locked shards.
///
/// Shards only guard map membership. Eviction bookkeeping lives in the
/// eviction segments, which are partitioned independently of the shards.
pub(crate) struct ShardedStore<K, V, H> {
  shards: Box<[CachePadded<Shard<K, V, H>>]>,
  hasher: H,
}

impl<K, V, H> fmt::Debug for ShardedStore<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ShardedStore")
      .field("num_shards", &self.shards.len())
      .finish()
  }
}

impl<K, V, H> ShardedStore<K, V, H>
where
  K: Eq + Hash,
  H: BuildHasher + Clone,
{
  /// Creates a new `ShardedStore`. `num_shards` must be a power of two.
  pub(crate) fn new(num_shards: usize, hasher: H) -> Self {
    debug_assert!(num_shards.is_power_of_two());
    let shards = (0..num_shards)
      .map(|_| CachePadded::new(RwLock::new(HashMap::with_hasher(hasher.clone()))))
      .collect::<Vec<_>>()
      .into_boxed_slice();

    Self { shards, hasher }
  }

  #[inline]
  pub(crate) fn hash(&self, key: &K) -> u64 {
    self.hasher.hash_one(key)
  }

  /// The shard for a key hash.
  ///
  /// Uses the high bits of the hash; eviction segments are routed by the low
  /// bits, so the two partitions stay independent.
  #[inline]
  pub(crate) fn shard(&self, hash: u64) -> &Shard<K, V, H> {
    let bits = self.shards.len().trailing_zeros();
    let index = if bits == 0 {
      0
    } else {
      (hash >> (64 - bits)) as usize
    };
    &self.shards[index]
  }

  /// Returns an iterator over all the shard locks.
  pub(crate) fn iter_shards(&self) -> impl Iterator<Item = &Shard<K, V, H>> {
    self.shards.iter().map(|padded| &**padded)
  }

  #[inline]
  pub(crate) fn shard_at(&self, index: usize) -> &Shard<K, V, H> {
    &self.shards[index]
  }

  pub(crate) fn num_shards(&self) -> usize {
    self.shards.len()
  }

  /// Removes the key only if it still maps to `entry` itself.
  pub(crate) fn remove_if_same(&self, entry: &Arc<CacheEntry<K, V>>) -> bool {
    let mut shard = self.shard(entry.hash()).write();
    match shard.get(entry.key()) {
      Some(current) if Arc::ptr_eq(current, entry) => {
        shard.remove(entry.key());
        true
      }
      _ => false,
    }
  }
}
