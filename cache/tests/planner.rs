use fibre_segcache::{PlanInput, SegmentPlan, DEFAULT_ENTRY_CAPACITY, MIN_SEGMENTED_CAPACITY, UNBOUNDED};
use proptest::prelude::*;

fn arb_input() -> impl Strategy<Value = PlanInput> {
  (
    prop_oneof![Just(UNBOUNDED), 0i64..5_000_000],
    prop_oneof![Just(UNBOUNDED), 0i64..1_000_000_000],
    any::<bool>(),
    any::<bool>(),
    1usize..=256,
    prop_oneof![Just(0usize), 1usize..=64],
  )
    .prop_map(
      |(entry_capacity, maximum_weight, strict_eviction, boost_concurrency, available_processors, segment_count_override)| {
        PlanInput {
          entry_capacity,
          maximum_weight,
          strict_eviction,
          boost_concurrency,
          available_processors,
          segment_count_override,
        }
      },
    )
}

proptest! {
  #[test]
  fn segment_count_is_a_power_of_two(input in arb_input()) {
    let plan = SegmentPlan::compute(input);
    prop_assert!(plan.segment_count >= 1);
    prop_assert!(plan.segment_count.is_power_of_two());
  }

  #[test]
  fn strict_eviction_always_uses_one_segment(input in arb_input()) {
    let plan = SegmentPlan::compute(PlanInput { strict_eviction: true, ..input });
    prop_assert_eq!(plan.segment_count, 1);
  }

  #[test]
  fn small_caches_are_never_segmented(capacity in 0i64..MIN_SEGMENTED_CAPACITY, input in arb_input()) {
    let plan = SegmentPlan::compute(PlanInput { entry_capacity: capacity, ..input });
    prop_assert_eq!(plan.segment_count, 1);
  }

  #[test]
  fn automatic_count_is_bounded_by_processors(input in arb_input()) {
    let plan = SegmentPlan::compute(PlanInput { segment_count_override: 0, ..input });
    prop_assert!(plan.segment_count <= input.available_processors * 2);
  }

  #[test]
  fn split_capacity_covers_the_request(input in arb_input()) {
    let plan = SegmentPlan::compute(input);
    let requested = if input.entry_capacity < 0 && input.maximum_weight < 0 {
      DEFAULT_ENTRY_CAPACITY
    } else {
      input.entry_capacity
    };
    if requested < 0 {
      prop_assert_eq!(plan.per_segment_capacity, UNBOUNDED);
    } else {
      let total = plan.total_capacity();
      prop_assert!(total >= requested);
      prop_assert!(total < requested + plan.segment_count as i64);
    }
  }

  #[test]
  fn unbounded_weight_stays_unbounded(input in arb_input()) {
    let plan = SegmentPlan::compute(PlanInput { maximum_weight: UNBOUNDED, ..input });
    prop_assert_eq!(plan.per_segment_weight, UNBOUNDED);
  }

  #[test]
  fn planning_is_deterministic(input in arb_input()) {
    prop_assert_eq!(SegmentPlan::compute(input), SegmentPlan::compute(input));
  }
}

#[test]
fn unconfigured_cache_gets_the_default_capacity() {
  let plan = SegmentPlan::compute(PlanInput {
    entry_capacity: UNBOUNDED,
    maximum_weight: UNBOUNDED,
    strict_eviction: false,
    boost_concurrency: false,
    available_processors: 4,
    segment_count_override: 0,
  });
  assert_eq!(plan.segment_count, 2);
  assert_eq!(plan.total_capacity(), DEFAULT_ENTRY_CAPACITY);
}

#[test]
fn boost_uses_the_next_power_of_two_above_the_processor_count() {
  let plan = SegmentPlan::compute(PlanInput {
    entry_capacity: 100_000,
    maximum_weight: UNBOUNDED,
    strict_eviction: false,
    boost_concurrency: true,
    available_processors: 4,
    segment_count_override: 0,
  });
  assert_eq!(plan.segment_count, 8);
  assert_eq!(plan.per_segment_capacity, 12_500);
}

#[test]
fn override_is_rounded_up() {
  let plan = SegmentPlan::compute(PlanInput {
    entry_capacity: 10_000,
    maximum_weight: 999,
    strict_eviction: false,
    boost_concurrency: false,
    available_processors: 1,
    segment_count_override: 3,
  });
  assert_eq!(plan.segment_count, 4);
  assert_eq!(plan.per_segment_capacity, 2_500);
  assert_eq!(plan.per_segment_weight, 250);
}
