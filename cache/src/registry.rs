//! An explicit directory of named caches.

use crate::error::BuildError;
use crate::handle::Cache;

use std::any::Any;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// The type-erased view the registry keeps of a cache.
trait RegisteredCache: Send + Sync {
  fn clear(&self);
  fn len(&self) -> usize;
  fn as_any(&self) -> &dyn Any;
}

impl<K, V, H> RegisteredCache for Cache<K, V, H>
where
  K: Eq + Hash + Clone + Send + Sync + 'static,
  V: Send + Sync + 'static,
  H: BuildHasher + Clone + Send + Sync + 'static,
{
  fn clear(&self) {
    Cache::clear(self);
  }

  fn len(&self) -> usize {
    Cache::len(self)
  }

  fn as_any(&self) -> &dyn Any {
    self
  }
}

/// Holds caches by name.
///
/// There is no process-wide registry: create one where the application
/// starts and pass it to `CacheBuilder::build_in`.
#[derive(Default)]
pub struct CacheRegistry {
  caches: DashMap<String, Arc<dyn RegisteredCache>>,
}

impl CacheRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn register<K, V, H>(&self, cache: &Cache<K, V, H>) -> Result<(), BuildError>
  where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
    H: BuildHasher + Clone + Send + Sync + 'static,
  {
    match self.caches.entry(cache.name().to_string()) {
      Entry::Occupied(occupied) => Err(BuildError::DuplicateName(occupied.key().clone())),
      Entry::Vacant(vacant) => {
        vacant.insert(Arc::new(cache.clone()));
        Ok(())
      }
    }
  }

  /// Returns the cache registered under `name`, if it has these types.
  pub fn get<K, V, H>(&self, name: &str) -> Option<Cache<K, V, H>>
  where
    K: 'static,
    V: 'static,
    H: 'static,
  {
    let cache = self.caches.get(name)?;
    cache.as_any().downcast_ref::<Cache<K, V, H>>().cloned()
  }

  pub fn contains(&self, name: &str) -> bool {
    self.caches.contains_key(name)
  }

  /// The names of all registered caches, sorted.
  pub fn names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.caches.iter().map(|entry| entry.key().clone()).collect();
    names.sort();
    names
  }

  /// Forgets the cache registered under `name`. The cache itself lives on
  /// while handles to it exist.
  pub fn unregister(&self, name: &str) -> bool {
    self.caches.remove(name).is_some()
  }

  /// Clears every registered cache.
  pub fn clear_all(&self) {
    for entry in self.caches.iter() {
      entry.value().clear();
    }
  }

  /// Total entries over all registered caches.
  pub fn total_entries(&self) -> usize {
    self.caches.iter().map(|entry| entry.value().len()).sum()
  }

  pub fn len(&self) -> usize {
    self.caches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.caches.is_empty()
  }
}

impl fmt::Debug for CacheRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheRegistry")
      .field("names", &self.names())
      .finish()
  }
}
