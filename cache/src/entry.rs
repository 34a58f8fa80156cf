use crate::error::LoaderError;
use crate::time;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// What an entry holds: a value, or a cached loader failure.
pub(crate) enum Stored<V> {
  Value(Arc<V>),
  Failure(LoaderError),
}

/// A container for a value in the cache, holding all necessary metadata.
///
/// An entry is owned by exactly one eviction segment, the one its key routes
/// to. Entries are immutable apart from their access counter and expiry
/// timestamp; an update replaces the entry.
pub struct CacheEntry<K, V> {
  key: K,
  stored: Stored<V>,
  hash: u64,
  weight: u64,
  segment: usize,
  written_at: u64,
  /// The expiration timestamp in nanoseconds since the cache epoch.
  /// `time::ETERNAL` means no expiry.
  expires_at: AtomicU64,
  hits: AtomicU64,
}

impl<K, V> CacheEntry<K, V> {
  pub(crate) fn new(
    key: K,
    stored: Stored<V>,
    hash: u64,
    weight: u64,
    segment: usize,
    expires_at: u64,
  ) -> Self {
    Self {
      key,
      stored,
      hash,
      weight,
      segment,
      written_at: time::now_nanos(),
      expires_at: AtomicU64::new(expires_at),
      hits: AtomicU64::new(0),
    }
  }

  #[inline]
  pub fn key(&self) -> &K {
    &self.key
  }

  /// The value, or `None` if this entry holds a cached loader failure.
  #[inline]
  pub fn value(&self) -> Option<&Arc<V>> {
    match &self.stored {
      Stored::Value(value) => Some(value),
      Stored::Failure(_) => None,
    }
  }

  /// The cached loader failure, if any.
  #[inline]
  pub fn failure(&self) -> Option<&LoaderError> {
    match &self.stored {
      Stored::Value(_) => None,
      Stored::Failure(error) => Some(error),
    }
  }

  #[inline]
  pub(crate) fn stored(&self) -> &Stored<V> {
    &self.stored
  }

  /// The weight this entry counts against its segment's weight bound.
  #[inline]
  pub fn weight(&self) -> u64 {
    self.weight
  }

  /// Index of the eviction segment owning this entry.
  #[inline]
  pub fn segment(&self) -> usize {
    self.segment
  }

  #[inline]
  pub(crate) fn hash(&self) -> u64 {
    self.hash
  }

  /// When this entry was written.
  pub fn written_at(&self) -> Instant {
    time::nanos_to_instant(self.written_at)
  }

  /// When this entry stops being fresh, `None` if it never expires.
  pub fn expires_at(&self) -> Option<Instant> {
    match self.expires_at.load(Ordering::Relaxed) {
      time::ETERNAL => None,
      nanos => Some(time::nanos_to_instant(nanos)),
    }
  }

  /// Records a read hit. Lock-free.
  #[inline]
  pub fn record_hit(&self) {
    self.hits.fetch_add(1, Ordering::Relaxed);
  }

  /// Returns the hits recorded since the last call and resets the counter.
  #[inline]
  pub fn take_hits(&self) -> u64 {
    self.hits.swap(0, Ordering::Relaxed)
  }

  /// Checks if the entry is expired at `now_nanos`.
  #[inline]
  pub(crate) fn is_expired_at(&self, now_nanos: u64) -> bool {
    let expires_at = self.expires_at.load(Ordering::Relaxed);
    expires_at != time::ETERNAL && now_nanos >= expires_at
  }

  #[inline]
  pub(crate) fn is_expired(&self) -> bool {
    self.is_expired_at(time::now_nanos())
  }
}

impl<K: fmt::Debug, V> fmt::Debug for CacheEntry<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheEntry")
      .field("key", &self.key)
      .field("weight", &self.weight)
      .field("segment", &self.segment)
      .field("failed", &self.failure().is_some())
      .field("expires_at", &self.expires_at.load(Ordering::Relaxed))
      .finish_non_exhaustive()
  }
}

/// A cheap, owned view of an entry handed to listeners and loaders.
///
/// The snapshot keeps the entry alive; it does not observe later updates.
pub struct EntrySnapshot<K, V>(pub(crate) Arc<CacheEntry<K, V>>);

impl<K, V> EntrySnapshot<K, V> {
  pub fn key(&self) -> &K {
    self.0.key()
  }

  pub fn value(&self) -> Option<&Arc<V>> {
    self.0.value()
  }

  pub fn failure(&self) -> Option<&LoaderError> {
    self.0.failure()
  }

  pub fn weight(&self) -> u64 {
    self.0.weight()
  }

  pub fn expires_at(&self) -> Option<Instant> {
    self.0.expires_at()
  }
}

impl<K, V> Clone for EntrySnapshot<K, V> {
  fn clone(&self) -> Self {
    Self(Arc::clone(&self.0))
  }
}

impl<K: fmt::Debug, V> fmt::Debug for EntrySnapshot<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("EntrySnapshot").field(&self.0).finish()
  }
}
