#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::thread;
use std::time::{Duration, Instant};

use fibre_segcache::{Cache, CacheBuilder};

// A custom hasher that lets a test decide where a key lands.
// The hash of an `i32` key is the key itself. Eviction segments are routed
// by the low bits, so with 2 segments:
// - even keys -> segment 0
// - odd keys  -> segment 1
// The map shard uses the high bits, so every small key lands in shard 0.
#[derive(Clone, Default)]
pub struct ShardControllingHasher;
impl BuildHasher for ShardControllingHasher {
  type Hasher = TestHasher;
  fn build_hasher(&self) -> Self::Hasher {
    TestHasher(0)
  }
}
pub struct TestHasher(u64);
impl Hasher for TestHasher {
  fn finish(&self) -> u64 {
    self.0
  }
  fn write(&mut self, _: &[u8]) {
    unimplemented!()
  }
  fn write_i32(&mut self, i: i32) {
    self.0 = i as u64;
  }
}

// Helper to build a weight-bounded cache with a fixed segment count. Every
// entry weighs 1, so `maximum_weight / segments` entries fit per segment.
pub fn build_segmented_cache(segments: usize, maximum_weight: i64) -> Cache<i32, String, ShardControllingHasher> {
  CacheBuilder::new()
    .segment_count(segments)
    .maximum_weight(maximum_weight)
    .hasher(ShardControllingHasher)
    .build()
    .unwrap()
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn await_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if Instant::now() >= deadline {
      return false;
    }
    thread::sleep(Duration::from_millis(5));
  }
}
