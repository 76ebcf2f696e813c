//! Bar timestamps: formatting and lenient parsing.
//!
//! Daily, weekly and monthly bars carry a midnight timestamp. Intraday bars
//! carry the bucket's end time to the minute.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Timestamp of a single bar.
pub type Timestamp = NaiveDateTime;

const DATE_FMT: &str = "%Y-%m-%d";
const MINUTE_FMT: &str = "%Y-%m-%d %H:%M";

/// Midnight on `date`, the timestamp used for daily-and-slower bars.
pub fn at_midnight(date: NaiveDate) -> Timestamp {
    date.and_time(NaiveTime::MIN)
}

/// Format a bar timestamp.
///
/// With `fmt` set, strftime-style formatting is applied verbatim. Without it,
/// midnight timestamps render as `YYYY-MM-DD` and anything else as
/// `YYYY-MM-DD HH:MM`.
pub fn format_timestamp(ts: &Timestamp, fmt: Option<&str>) -> String {
    match fmt {
        Some(fmt) => ts.format(fmt).to_string(),
        None if ts.time() == NaiveTime::MIN => ts.format(DATE_FMT).to_string(),
        None if ts.second() == 0 => ts.format(MINUTE_FMT).to_string(),
        None => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

/// Parse a timestamp as written by this crate or by a vendor.
///
/// Accepts `YYYY-MM-DD` or `YYYY/MM/DD`, optionally followed by ` HH:MM` or
/// ` HH:MM:SS`, and the compact `YYYYMMDDHHMMSS[sss]` intraday form.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    if s.len() >= 14 && s.bytes().all(|b| b.is_ascii_digit()) {
        return parse_compact(s);
    }

    let normalized = s.replace('/', "-").replacen('T', " ", 1);
    if normalized.len() == 10 {
        return NaiveDate::parse_from_str(&normalized, DATE_FMT)
            .ok()
            .map(at_midnight);
    }

    NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(&normalized, MINUTE_FMT))
        .ok()
}

fn parse_compact(s: &str) -> Option<Timestamp> {
    let num = |range: std::ops::Range<usize>| s.get(range)?.parse::<u32>().ok();
    let date = NaiveDate::from_ymd_opt(num(0..4)? as i32, num(4..6)?, num(6..8)?)?;
    let time = NaiveTime::from_hms_opt(num(8..10)?, num(10..12)?, num(12..14)?)?;
    Some(date.and_time(time))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> Timestamp {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap()
    }

    #[test]
    fn daily_timestamps_render_as_plain_dates() {
        assert_eq!(format_timestamp(&ts(2024, 3, 10, 0, 0), None), "2024-03-10");
    }

    #[test]
    fn intraday_timestamps_keep_minutes() {
        assert_eq!(
            format_timestamp(&ts(2024, 3, 8, 9, 35), None),
            "2024-03-08 09:35"
        );
    }

    #[test]
    fn explicit_format_wins() {
        assert_eq!(
            format_timestamp(&ts(2024, 3, 8, 9, 35), Some("%Y%m%d")),
            "20240308"
        );
    }

    #[test]
    fn parses_slash_and_dash_dates() {
        assert_eq!(parse_timestamp("2024/03/10"), Some(ts(2024, 3, 10, 0, 0)));
        assert_eq!(parse_timestamp("2024-03-10"), Some(ts(2024, 3, 10, 0, 0)));
    }

    #[test]
    fn parses_intraday_forms() {
        assert_eq!(
            parse_timestamp("2024-03-08 09:35"),
            Some(ts(2024, 3, 8, 9, 35))
        );
        assert_eq!(
            parse_timestamp("2024/03/08 09:35:00"),
            Some(ts(2024, 3, 8, 9, 35))
        );
        assert_eq!(
            parse_timestamp("20240308093500000"),
            Some(ts(2024, 3, 8, 9, 35))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("2024-13-40"), None);
    }

    #[test]
    fn format_then_parse_is_stable() {
        for t in [ts(2024, 1, 2, 0, 0), ts(2024, 1, 2, 14, 55)] {
            assert_eq!(parse_timestamp(&format_timestamp(&t, None)), Some(t));
        }
    }
}
