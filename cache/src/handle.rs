use crate::core::{CoreCache, Iter};
use crate::decorated::DecoratedCache;
use crate::error::CacheError;
use crate::loader::LoadHandle;
use crate::metrics::MetricsSnapshot;
use crate::plan::SegmentPlan;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A handle to a cache.
///
/// The variant is chosen once, when the cache is assembled: `Core` when no
/// loader, writer, listener, weigher or expiry policy is configured,
/// `Decorated` otherwise. Handles are cheap to clone and share the cache.
pub enum Cache<K, V, H = ahash::RandomState> {
  Core(Arc<CoreCache<K, V, H>>),
  Decorated(Arc<DecoratedCache<K, V, H>>),
}

impl<K, V, H> Clone for Cache<K, V, H> {
  fn clone(&self) -> Self {
    match self {
      Cache::Core(core) => Cache::Core(Arc::clone(core)),
      Cache::Decorated(decorated) => Cache::Decorated(Arc::clone(decorated)),
    }
  }
}

impl<K, V, H> fmt::Debug for Cache<K, V, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Cache::Core(core) => f.debug_tuple("Cache::Core").field(core).finish(),
      Cache::Decorated(decorated) => f.debug_tuple("Cache::Decorated").field(decorated).finish(),
    }
  }
}

impl<K, V, H> Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn core(&self) -> &CoreCache<K, V, H> {
    match self {
      Cache::Core(core) => core,
      Cache::Decorated(decorated) => decorated.core(),
    }
  }

  pub fn name(&self) -> &str {
    self.core().name()
  }

  pub fn is_decorated(&self) -> bool {
    matches!(self, Cache::Decorated(_))
  }

  /// Looks up `key`, loading it on a miss when a loader is configured.
  ///
  /// Returns `Ok(None)` for a miss without a loader. A cached loader failure
  /// is returned as `Err(CacheError::Loader(..))`.
  pub fn get(&self, key: &K) -> Result<Option<Arc<V>>, CacheError> {
    match self {
      Cache::Core(core) => Ok(core.get(key)),
      Cache::Decorated(decorated) => decorated.get(key),
    }
  }

  /// Looks up `key` without blocking on an async loader.
  pub fn get_async(&self, key: &K) -> LoadHandle<V> {
    match self {
      Cache::Core(core) => LoadHandle::ready(Ok(core.get(key))),
      Cache::Decorated(decorated) => decorated.get_async(key),
    }
  }

  /// Returns a fresh value without loading and without recording an access.
  pub fn peek(&self, key: &K) -> Option<Arc<V>> {
    self.core().peek(key)
  }

  pub fn contains_key(&self, key: &K) -> bool {
    self.core().contains_key(key)
  }

  /// Stores a value. Fails only if a configured writer fails, in which case
  /// nothing is stored.
  pub fn put(&self, key: K, value: V) -> Result<(), CacheError> {
    match self {
      Cache::Core(core) => {
        core.put(key, value);
        Ok(())
      }
      Cache::Decorated(decorated) => decorated.put(key, value),
    }
  }

  /// Removes `key`. Returns `true` if a fresh value was removed.
  pub fn remove(&self, key: &K) -> Result<bool, CacheError> {
    match self {
      Cache::Core(core) => Ok(core.remove(key)),
      Cache::Decorated(decorated) => decorated.remove(key),
    }
  }

  /// Removes every entry without firing any listener.
  pub fn clear(&self) {
    self.core().clear();
  }

  /// Removes every expired entry. Returns how many were removed.
  pub fn purge_expired(&self) -> usize {
    match self {
      Cache::Core(core) => core.purge_expired(),
      Cache::Decorated(decorated) => decorated.purge_expired(),
    }
  }

  pub fn len(&self) -> usize {
    self.core().len()
  }

  pub fn is_empty(&self) -> bool {
    self.core().is_empty()
  }

  pub fn weight(&self) -> u64 {
    self.core().weight()
  }

  pub fn iter(&self) -> Iter<'_, K, V, H> {
    self.core().iter()
  }

  pub fn metrics(&self) -> MetricsSnapshot {
    self.core().metrics()
  }

  pub fn plan(&self) -> &SegmentPlan {
    self.core().plan()
  }

  pub fn segment_count(&self) -> usize {
    self.core().segment_count()
  }
}
