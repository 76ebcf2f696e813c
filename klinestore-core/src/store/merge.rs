//! Merge of an existing series with newly fetched bars.

use crate::domain::{Bar, Timestamp};
use std::collections::BTreeMap;

/// Concatenate `existing` and `incoming`, keep one bar per timestamp and
/// return them in ascending time order.
///
/// When both sides carry the same timestamp the incoming bar wins. Duplicate
/// timestamps inside `incoming` resolve to the last occurrence.
pub fn merge_bars(existing: Vec<Bar>, incoming: Vec<Bar>) -> Vec<Bar> {
    let mut by_time: BTreeMap<Timestamp, Bar> = BTreeMap::new();
    for bar in existing.into_iter().chain(incoming) {
        by_time.insert(bar.time, bar);
    }
    by_time.into_values().collect()
}

/// Sort ascending and drop duplicate timestamps, last occurrence wins.
pub fn normalize(bars: Vec<Bar>) -> Vec<Bar> {
    merge_bars(Vec::new(), bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bar(day: u32, close: f64) -> Bar {
        Bar::daily(
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            close,
            close,
            close,
            close,
            100.0,
        )
    }

    #[test]
    fn incoming_overwrites_matching_timestamp() {
        let merged = merge_bars(
            vec![bar(4, 10.0), bar(5, 11.0)],
            vec![bar(5, 11.5), bar(6, 12.0)],
        );
        let closes: Vec<f64> = merged.iter().map(|b| b.close).collect();
        assert_eq!(closes, [10.0, 11.5, 12.0]);
    }

    #[test]
    fn output_is_sorted_even_from_unsorted_input() {
        let merged = merge_bars(vec![bar(9, 1.0), bar(2, 1.0)], vec![bar(5, 1.0)]);
        let days: Vec<u32> = merged
            .iter()
            .map(|b| chrono::Datelike::day(&b.date()))
            .collect();
        assert_eq!(days, [2, 5, 9]);
    }

    #[test]
    fn duplicates_inside_one_batch_keep_the_last() {
        let merged = normalize(vec![bar(3, 1.0), bar(3, 2.0)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].close, 2.0);
    }
}
