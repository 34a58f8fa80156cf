//! Decides how many eviction segments a cache gets and how its capacity and
//! weight budgets are split across them.

/// Entry capacity used when neither an entry capacity nor a maximum weight
/// is configured, so a cache is never unbounded by accident.
pub const DEFAULT_ENTRY_CAPACITY: i64 = 2000;

/// Below this entry capacity a cache always gets a single segment.
pub const MIN_SEGMENTED_CAPACITY: i64 = 1000;

/// Largest segment count a plan ever yields. Larger overrides are clamped
/// here and rejected by the builder.
pub const MAX_SEGMENT_COUNT: usize = 1 << 16;

/// Marker for "no bound" in capacities and weights.
pub const UNBOUNDED: i64 = -1;

/// The inputs of the segment planner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanInput {
  pub entry_capacity: i64,
  pub maximum_weight: i64,
  pub strict_eviction: bool,
  pub boost_concurrency: bool,
  pub available_processors: usize,
  pub segment_count_override: usize,
}

/// How a cache's eviction is partitioned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
  /// Number of eviction segments, always a power of two and at least 1.
  pub segment_count: usize,
  /// Entry bound of every segment, `UNBOUNDED` for none.
  pub per_segment_capacity: i64,
  /// Weight bound of every segment, `UNBOUNDED` for none.
  pub per_segment_weight: i64,
}

impl SegmentPlan {
  /// Computes the plan. This is a pure function of its input.
  ///
  /// The per-segment bounds are ceiling divided, so their sum may exceed the
  /// requested total by at most `segment_count - 1`, but is never below it.
  pub fn compute(input: PlanInput) -> Self {
    let mut entry_capacity = input.entry_capacity;
    if entry_capacity < 0 && input.maximum_weight < 0 {
      entry_capacity = DEFAULT_ENTRY_CAPACITY;
    }
    let segment_count = segment_count(
      input.strict_eviction,
      input.available_processors,
      input.boost_concurrency,
      entry_capacity,
      input.segment_count_override,
    );
    Self {
      segment_count,
      per_segment_capacity: split_bound(entry_capacity, segment_count),
      per_segment_weight: split_bound(input.maximum_weight, segment_count),
    }
  }

  /// Sum of the entry bounds of all segments, `UNBOUNDED` if unbounded.
  pub fn total_capacity(&self) -> i64 {
    total_bound(self.per_segment_capacity, self.segment_count)
  }

  /// Sum of the weight bounds of all segments, `UNBOUNDED` if unbounded.
  pub fn total_weight(&self) -> i64 {
    total_bound(self.per_segment_weight, self.segment_count)
  }
}

fn segment_count(
  strict_eviction: bool,
  available_processors: usize,
  boost_concurrency: bool,
  entry_capacity: i64,
  segment_count_override: usize,
) -> usize {
  let mut count = 1;
  if available_processors > 1 {
    count = 2;
    if boost_concurrency {
      // Smallest power of two strictly above the processor count.
      count = (available_processors.min(MAX_SEGMENT_COUNT) + 1).next_power_of_two();
    }
  }
  if segment_count_override > 0 {
    count = segment_count_override.min(MAX_SEGMENT_COUNT).next_power_of_two();
  } else {
    count = count.min(available_processors.max(1).saturating_mul(2));
  }
  count = count.min(MAX_SEGMENT_COUNT);
  if (0..MIN_SEGMENTED_CAPACITY).contains(&entry_capacity) {
    count = 1;
  }
  if strict_eviction {
    count = 1;
  }
  count
}

// Unbounded and maximal values are not divided: dividing "no bound" would
// create a bound that was never asked for.
fn split_bound(total: i64, segment_count: usize) -> i64 {
  if total < 0 {
    return UNBOUNDED;
  }
  if total == i64::MAX {
    return i64::MAX;
  }
  let segments = segment_count as i64;
  let mut per_segment = total / segments;
  if total % segments > 0 {
    per_segment += 1;
  }
  per_segment
}

fn total_bound(per_segment: i64, segment_count: usize) -> i64 {
  if per_segment < 0 {
    UNBOUNDED
  } else {
    per_segment.saturating_mul(segment_count as i64)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn input(entry_capacity: i64, processors: usize) -> PlanInput {
    PlanInput {
      entry_capacity,
      maximum_weight: UNBOUNDED,
      strict_eviction: false,
      boost_concurrency: false,
      available_processors: processors,
      segment_count_override: 0,
    }
  }

  #[test]
  fn single_processor_gets_one_segment() {
    let plan = SegmentPlan::compute(input(10_000, 1));
    assert_eq!(plan.segment_count, 1);
    assert_eq!(plan.per_segment_capacity, 10_000);
  }

  #[test]
  fn two_segments_without_boost() {
    let plan = SegmentPlan::compute(input(10_001, 8));
    assert_eq!(plan.segment_count, 2);
    assert_eq!(plan.per_segment_capacity, 5001);
    assert_eq!(plan.per_segment_weight, UNBOUNDED);
  }

  #[test]
  fn boost_rounds_above_processor_count() {
    let mut i = input(100_000, 4);
    i.boost_concurrency = true;
    assert_eq!(SegmentPlan::compute(i).segment_count, 8);

    i.available_processors = 3;
    assert_eq!(SegmentPlan::compute(i).segment_count, 4);

    i.available_processors = 6;
    // 8 is within the 2 * processors clamp.
    assert_eq!(SegmentPlan::compute(i).segment_count, 8);
  }

  #[test]
  fn override_is_rounded_to_power_of_two_and_not_clamped() {
    let mut i = input(100_000, 2);
    i.segment_count_override = 5;
    let plan = SegmentPlan::compute(i);
    assert_eq!(plan.segment_count, 8);
    assert_eq!(plan.per_segment_capacity, 12_500);
  }

  #[test]
  fn oversized_override_is_clamped() {
    let mut i = input(100_000, 2);
    i.segment_count_override = usize::MAX;
    assert_eq!(SegmentPlan::compute(i).segment_count, MAX_SEGMENT_COUNT);

    i.segment_count_override = usize::MAX / 2 + 2;
    assert_eq!(SegmentPlan::compute(i).segment_count, MAX_SEGMENT_COUNT);
  }

  #[test]
  fn huge_processor_count_does_not_overflow() {
    let mut i = input(100_000, usize::MAX);
    i.boost_concurrency = true;
    assert_eq!(SegmentPlan::compute(i).segment_count, MAX_SEGMENT_COUNT);
  }

  #[test]
  fn strict_and_small_force_single_segment() {
    let mut i = input(100_000, 16);
    i.boost_concurrency = true;
    i.segment_count_override = 32;
    i.strict_eviction = true;
    assert_eq!(SegmentPlan::compute(i).segment_count, 1);

    i.strict_eviction = false;
    i.entry_capacity = 999;
    assert_eq!(SegmentPlan::compute(i).segment_count, 1);
  }

  #[test]
  fn unbounded_defaults_to_modest_capacity() {
    let plan = SegmentPlan::compute(input(UNBOUNDED, 4));
    assert_eq!(plan.segment_count, 2);
    assert_eq!(plan.per_segment_capacity, DEFAULT_ENTRY_CAPACITY / 2);
  }

  #[test]
  fn weight_bound_keeps_entry_capacity_unbounded() {
    let mut i = input(UNBOUNDED, 4);
    i.maximum_weight = 1001;
    let plan = SegmentPlan::compute(i);
    assert_eq!(plan.segment_count, 2);
    assert_eq!(plan.per_segment_capacity, UNBOUNDED);
    assert_eq!(plan.per_segment_weight, 501);
    assert_eq!(plan.total_weight(), 1002);
  }

  #[test]
  fn maximal_values_propagate_undivided() {
    let mut i = input(i64::MAX, 4);
    i.maximum_weight = i64::MAX;
    let plan = SegmentPlan::compute(i);
    assert_eq!(plan.segment_count, 2);
    assert_eq!(plan.per_segment_capacity, i64::MAX);
    assert_eq!(plan.per_segment_weight, i64::MAX);
  }
}
