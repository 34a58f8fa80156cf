use crate::expiry::ExpiryMode;
use crate::plan::UNBOUNDED;

/// Upper bound on the number of map shards.
pub const MAX_SHARDS: usize = 1 << 16;

/// The scalar configuration of a cache.
///
/// Capabilities (loader, writer, listeners, weigher, expiry policy) are not
/// part of it; they are given to the `CacheBuilder` directly. With the
/// `serde` feature a config can be read from an external file and turned
/// into a builder with `CacheBuilder::from_config`.
///
/// ```
/// # #[cfg(feature = "serde")] {
/// let config: fibre_segcache::CacheConfig =
///   serde_json::from_str(r#"{ "name": "users", "entry_capacity": 10000 }"#).unwrap();
/// assert_eq!(config.entry_capacity, 10000);
/// assert_eq!(config.maximum_weight, -1);
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CacheConfig {
  /// Registry name. Generated when `None`.
  pub name: Option<String>,
  /// Maximum number of entries, `-1` for no entry bound.
  pub entry_capacity: i64,
  /// Maximum total weight, `-1` for no weight bound.
  pub maximum_weight: i64,
  /// Keep one global eviction order by using a single segment.
  pub strict_eviction: bool,
  /// Use more segments, up to the next power of two above the CPU count.
  pub boost_concurrency: bool,
  /// Fixed number of segments, rounded up to a power of two. `0` is auto.
  pub segment_count_override: usize,
  /// Serve expired values while reloading them in the background.
  pub refresh_ahead: bool,
  pub expiry: ExpiryMode,
  /// Number of map shards, rounded up to a power of two. `0` is auto.
  pub shards: usize,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      name: None,
      entry_capacity: UNBOUNDED,
      maximum_weight: UNBOUNDED,
      strict_eviction: false,
      boost_concurrency: false,
      segment_count_override: 0,
      refresh_ahead: false,
      expiry: ExpiryMode::Eternal,
      shards: 0,
    }
  }
}

impl CacheConfig {
  /// The number of map shards to create, at most `MAX_SHARDS`.
  pub(crate) fn resolved_shards(&self) -> usize {
    let requested = if self.shards == 0 {
      num_cpus::get().saturating_mul(4).max(1)
    } else {
      self.shards
    };
    requested.min(MAX_SHARDS).next_power_of_two()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn shards_round_up_to_a_power_of_two() {
    let config = CacheConfig {
      shards: 5,
      ..CacheConfig::default()
    };
    assert_eq!(config.resolved_shards(), 8);
  }

  #[test]
  fn oversized_shard_count_is_clamped() {
    let config = CacheConfig {
      shards: usize::MAX,
      ..CacheConfig::default()
    };
    assert_eq!(config.resolved_shards(), MAX_SHARDS);
  }
}
