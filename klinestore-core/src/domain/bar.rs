//! One OHLCV observation plus turnover.

use super::time::{at_midnight, Timestamp};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One observation for a fixed period.
///
/// `volume`, `turnover` and `turnrate` are 0.0 when the provider does not
/// report them (bonds report no turnover, for example).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: Timestamp,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub turnover: f64,
    pub turnrate: f64,
}

impl Bar {
    /// A daily bar with no turnover information.
    pub fn daily(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            time: at_midnight(date),
            open,
            high,
            low,
            close,
            volume,
            turnover: 0.0,
            turnrate: 0.0,
        }
    }

    /// Calendar date of the bar.
    pub fn date(&self) -> NaiveDate {
        self.time.date()
    }
}
