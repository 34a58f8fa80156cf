use once_cell::sync::Lazy;
use std::time::{Duration, Instant};

// The single, static reference point for all time calculations in the cache.
// It is initialized lazily on its first use.
static CACHE_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Sentinel timestamp for entries that never expire.
pub(crate) const ETERNAL: u64 = 0;

#[inline]
fn nanos_since_epoch(instant: Instant) -> Option<u64> {
  u64::try_from(instant.saturating_duration_since(*CACHE_EPOCH).as_nanos()).ok()
}

/// Converts an `Instant` into nanoseconds since the cache's epoch.
///
/// Never returns `ETERNAL`; an instant at or before the epoch maps to 1ns,
/// one too far out saturates.
#[inline]
pub(crate) fn instant_to_nanos(instant: Instant) -> u64 {
  nanos_since_epoch(instant).unwrap_or(u64::MAX).max(1)
}

/// Converts an expiry instant into cache nanos. An instant past the
/// representable range never arrives and maps to `ETERNAL`.
#[inline]
pub(crate) fn expiry_nanos(instant: Instant) -> u64 {
  nanos_since_epoch(instant).map_or(ETERNAL, |nanos| nanos.max(1))
}

/// Converts nanoseconds since the cache's epoch back into an `Instant`.
#[inline]
pub(crate) fn nanos_to_instant(nanos: u64) -> Instant {
  *CACHE_EPOCH + Duration::from_nanos(nanos)
}

/// A helper to get the current time as nanoseconds since the epoch.
#[inline]
pub(crate) fn now_nanos() -> u64 {
  instant_to_nanos(Instant::now())
}

/// Computes the absolute expiry timestamp for a value written now and
/// valid for `ttl`.
#[inline]
pub(crate) fn expires_after(ttl: Duration) -> u64 {
  u64::try_from(ttl.as_nanos())
    .ok()
    .and_then(|ttl| now_nanos().checked_add(ttl))
    .unwrap_or(ETERNAL)
}
