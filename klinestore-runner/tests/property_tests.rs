//! Property tests for batch planning, statistics and the daily schedule.

use chrono::{Duration as ChronoDuration, NaiveDate, NaiveTime};
use klinestore_core::{Adjustment, InstrumentClass, Period};
use klinestore_runner::{next_run_after, plan_tasks, UpdateStats};
use proptest::prelude::*;
use std::collections::HashSet;

fn arb_code() -> impl Strategy<Value = String> {
    (0u32..20).prop_map(|n| format!("sh.6000{n:02}"))
}

fn arb_period() -> impl Strategy<Value = Period> {
    prop::sample::select(Period::ALL.to_vec())
}

proptest! {
    /// Plans are the distinct codes times the distinct periods, each key once.
    #[test]
    fn plan_is_deduplicated_cross_product(
        codes in prop::collection::vec(arb_code(), 0..12),
        periods in prop::collection::vec(arb_period(), 1..6),
    ) {
        let tasks = plan_tasks(InstrumentClass::Stock, &codes, &periods, Adjustment::Forward);

        let distinct_codes: HashSet<_> = codes.iter().collect();
        let distinct_periods: HashSet<_> = periods.iter().collect();
        prop_assert_eq!(tasks.len(), distinct_codes.len() * distinct_periods.len());

        let keys: HashSet<_> = tasks.iter().map(|t| t.key.clone()).collect();
        prop_assert_eq!(keys.len(), tasks.len());
    }

    /// Bond plans never carry an adjusted key.
    #[test]
    fn bond_plans_are_unadjusted(
        codes in prop::collection::vec((0u32..50).prop_map(|n| format!("0195{n:02}")), 1..8),
    ) {
        let tasks = plan_tasks(InstrumentClass::Bond, &codes, &[Period::Day], Adjustment::Backward);
        prop_assert!(tasks.iter().all(|t| t.key.adjustment == Adjustment::None));
    }

    /// Merged statistics add up counter by counter.
    #[test]
    fn merged_stats_sum(
        a in prop::collection::vec(0u8..3, 0..30),
        b in prop::collection::vec(0u8..3, 0..30),
    ) {
        let build = |events: &[u8]| {
            let mut stats = UpdateStats::new();
            for (i, e) in events.iter().enumerate() {
                match e {
                    0 => stats.record_written(i),
                    1 => stats.record_skipped(),
                    _ => stats.record_failed(format!("c{i}_day")),
                }
            }
            stats
        };
        let left = build(&a);
        let right = build(&b);
        let expected_completed = left.completed() + right.completed();
        let expected_records = left.new_records + right.new_records;

        let mut merged = left;
        merged.merge(right);
        prop_assert_eq!(merged.completed(), expected_completed);
        prop_assert_eq!(merged.new_records, expected_records);
        prop_assert_eq!(merged.failed_keys.len(), merged.failed_count);
    }

    /// The next run is strictly later and at most a day away.
    #[test]
    fn next_run_is_within_a_day(
        day in 1u32..28,
        now_secs in 0u32..86_400,
        at_secs in 0u32..86_400,
    ) {
        let now = NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_time(NaiveTime::from_num_seconds_from_midnight_opt(now_secs, 0).unwrap());
        let at = NaiveTime::from_num_seconds_from_midnight_opt(at_secs, 0).unwrap();

        let next = next_run_after(now, at);
        prop_assert!(next > now);
        prop_assert!(next - now <= ChronoDuration::days(1));
        prop_assert_eq!(next.time(), at);
    }
}
