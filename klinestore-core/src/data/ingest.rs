//! Turning provider rows into bars.

use crate::domain::{parse_timestamp, Bar};
use crate::store::normalize;
use tracing::warn;

/// One row as a provider reports it: a raw time string and optional numbers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    pub time: String,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
    pub turnover: Option<f64>,
    pub turnrate: Option<f64>,
}

/// Parse a numeric field, treating blanks and dashes as missing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "-" {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Convert raw rows to a sorted series without duplicate timestamps.
///
/// Missing numbers become 0.0. Rows whose time cannot be parsed are dropped
/// and counted in a single warning.
pub fn ingest_records(code: &str, records: Vec<RawRecord>) -> Vec<Bar> {
    let mut dropped = 0usize;
    let mut bars = Vec::with_capacity(records.len());
    for rec in records {
        let Some(time) = parse_timestamp(&rec.time) else {
            dropped += 1;
            continue;
        };
        bars.push(Bar {
            time,
            open: rec.open.unwrap_or(0.0),
            high: rec.high.unwrap_or(0.0),
            low: rec.low.unwrap_or(0.0),
            close: rec.close.unwrap_or(0.0),
            volume: rec.volume.unwrap_or(0.0),
            turnover: rec.turnover.unwrap_or(0.0),
            turnrate: rec.turnrate.unwrap_or(0.0),
        });
    }
    if dropped > 0 {
        warn!(code, dropped, "dropped rows with unparseable timestamps");
    }
    normalize(bars)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(time: &str, close: Option<f64>) -> RawRecord {
        RawRecord {
            time: time.to_string(),
            open: Some(1.0),
            high: Some(2.0),
            low: Some(0.5),
            close,
            volume: None,
            ..Default::default()
        }
    }

    #[test]
    fn missing_numbers_become_zero() {
        let bars = ingest_records("x", vec![rec("2024-03-04", None)]);
        assert_eq!(bars.len(), 1);
        assert_eq!(bars[0].close, 0.0);
        assert_eq!(bars[0].volume, 0.0);
        assert_eq!(bars[0].open, 1.0);
    }

    #[test]
    fn bad_times_dropped_and_output_sorted_deduped() {
        let bars = ingest_records(
            "x",
            vec![
                rec("2024-03-06", Some(3.0)),
                rec("??", Some(9.0)),
                rec("2024-03-04", Some(1.0)),
                rec("2024-03-06", Some(3.5)),
            ],
        );
        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        assert_eq!(closes, [1.0, 3.5]);
    }

    #[test]
    fn number_parsing() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number("-"), None);
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("-1.5"), Some(-1.5));
    }
}
