use crate::error::LoaderError;
use crate::time;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// When an entry stops being fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
  Eternal,
  At(Instant),
}

/// Computes the freshness of entries written through the decorated cache.
///
/// The policy also sees loader failures, so it decides how long a failure
/// stays cached. An `At` in the past makes the entry immediately stale.
pub trait ExpiryPolicy<K, V>: Send + Sync + 'static {
  fn expire_at(&self, key: &K, value: Result<&V, &LoaderError>, now: Instant) -> Expiry;
}

impl<K, V, F> ExpiryPolicy<K, V> for F
where
  F: Fn(&K, Result<&V, &LoaderError>, Instant) -> Expiry + Send + Sync + 'static,
{
  fn expire_at(&self, key: &K, value: Result<&V, &LoaderError>, now: Instant) -> Expiry {
    self(key, value, now)
  }
}

/// How a cache decides freshness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ExpiryMode {
  /// Entries never expire.
  #[default]
  Eternal,
  /// Entries expire a fixed duration after they were written.
  AfterWrite(Duration),
  /// An `ExpiryPolicy` decides per entry.
  PolicyDriven,
}

impl ExpiryMode {
  pub fn is_eternal(&self) -> bool {
    matches!(self, ExpiryMode::Eternal)
  }
}

/// The resolved expiry of one cache.
pub(crate) enum ExpiryRule<K, V> {
  Eternal,
  AfterWrite(Duration),
  Policy(Arc<dyn ExpiryPolicy<K, V>>),
}

impl<K: 'static, V: 'static> ExpiryRule<K, V> {
  /// The expiry timestamp, in cache nanos, of a value written at `now`.
  pub(crate) fn expires_at(&self, key: &K, value: Result<&V, &LoaderError>, now: Instant) -> u64 {
    let at = match self {
      ExpiryRule::Eternal => return time::ETERNAL,
      ExpiryRule::AfterWrite(ttl) => now.checked_add(*ttl),
      ExpiryRule::Policy(policy) => match policy.expire_at(key, value, now) {
        Expiry::Eternal => return time::ETERNAL,
        Expiry::At(at) => Some(at),
      },
    };
    // An instant too far out to represent never arrives.
    at.map_or(time::ETERNAL, time::expiry_nanos)
  }
}

impl<K, V> fmt::Debug for ExpiryRule<K, V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ExpiryRule::Eternal => write!(f, "Eternal"),
      ExpiryRule::AfterWrite(ttl) => f.debug_tuple("AfterWrite").field(ttl).finish(),
      ExpiryRule::Policy(_) => write!(f, "Policy"),
    }
  }
}
