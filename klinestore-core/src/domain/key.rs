//! Series keys: instrument code, K-line period and price adjustment.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors from parsing user-supplied key components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseKeyError {
    #[error("unknown period '{0}' (expected one of day, week, mon, 5m, 15m, 30m, 60m)")]
    UnknownPeriod(String),

    #[error("unknown adjustment '{0}' (expected none, qfq or hfq)")]
    UnknownAdjustment(String),

    #[error("unknown instrument class '{0}' (expected stock, bond or reit)")]
    UnknownClass(String),
}

/// Sampling granularity of bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    Day,
    Week,
    Month,
    Min5,
    Min15,
    Min30,
    Min60,
}

impl Period {
    pub const ALL: [Period; 7] = [
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Min5,
        Period::Min15,
        Period::Min30,
        Period::Min60,
    ];

    /// Directory name used in the on-disk layout.
    pub fn dir_name(self) -> &'static str {
        match self {
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "mon",
            Period::Min5 => "5m",
            Period::Min15 => "15m",
            Period::Min30 => "30m",
            Period::Min60 => "60m",
        }
    }

    pub fn is_intraday(self) -> bool {
        matches!(
            self,
            Period::Min5 | Period::Min15 | Period::Min30 | Period::Min60
        )
    }

    /// Parse a comma-separated period list such as `day,week,mon`.
    pub fn parse_list(s: &str) -> Result<Vec<Period>, ParseKeyError> {
        let mut periods = Vec::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let period: Period = part.parse()?;
            if !periods.contains(&period) {
                periods.push(period);
            }
        }
        Ok(periods)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Period {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" | "d" => Ok(Period::Day),
            "week" | "w" => Ok(Period::Week),
            "mon" | "month" | "m" => Ok(Period::Month),
            "5m" => Ok(Period::Min5),
            "15m" => Ok(Period::Min15),
            "30m" => Ok(Period::Min30),
            "60m" => Ok(Period::Min60),
            other => Err(ParseKeyError::UnknownPeriod(other.to_string())),
        }
    }
}

/// Whether historical prices are adjusted for corporate actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Adjustment {
    None,
    /// Forward-adjusted (qfq).
    Forward,
    /// Backward-adjusted (hfq).
    Backward,
}

impl Adjustment {
    pub fn dir_name(self) -> &'static str {
        match self {
            Adjustment::None => "none",
            Adjustment::Forward => "qfq",
            Adjustment::Backward => "hfq",
        }
    }
}

impl fmt::Display for Adjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for Adjustment {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Adjustment::None),
            "qfq" | "forward" => Ok(Adjustment::Forward),
            "hfq" | "backward" => Ok(Adjustment::Backward),
            other => Err(ParseKeyError::UnknownAdjustment(other.to_string())),
        }
    }
}

/// Instrument family. Determines provider behavior and update defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentClass {
    Stock,
    Bond,
    Reit,
}

impl InstrumentClass {
    /// Classify a stored code.
    ///
    /// Exchange-qualified codes (`sh.600000`) are stocks. Six-digit codes
    /// starting with `01` are treasury bonds; every other six-digit code is
    /// taken to be a REIT. The rule is a heuristic and can misclassify.
    pub fn classify(code: &str) -> Option<Self> {
        if code.contains('.') {
            return Some(InstrumentClass::Stock);
        }
        if code.len() == 6 && code.bytes().all(|b| b.is_ascii_digit()) {
            if code.starts_with("01") {
                return Some(InstrumentClass::Bond);
            }
            return Some(InstrumentClass::Reit);
        }
        None
    }

    /// Bonds and REITs only have daily, unadjusted bars.
    pub fn supports_period(self, period: Period) -> bool {
        match self {
            InstrumentClass::Stock => true,
            InstrumentClass::Bond | InstrumentClass::Reit => period == Period::Day,
        }
    }

    pub fn supports_adjustment(self, adjustment: Adjustment) -> bool {
        self == InstrumentClass::Stock || adjustment == Adjustment::None
    }

    /// Earliest date worth requesting for a full download.
    pub fn earliest_history(self) -> NaiveDate {
        let (y, m, d) = match self {
            InstrumentClass::Stock => (1990, 12, 19),
            InstrumentClass::Bond => (2000, 1, 1),
            InstrumentClass::Reit => (2020, 1, 1),
        };
        NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN)
    }

    pub fn name(self) -> &'static str {
        match self {
            InstrumentClass::Stock => "stock",
            InstrumentClass::Bond => "bond",
            InstrumentClass::Reit => "reit",
        }
    }
}

impl fmt::Display for InstrumentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for InstrumentClass {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stock" | "stocks" => Ok(InstrumentClass::Stock),
            "bond" | "bonds" => Ok(InstrumentClass::Bond),
            "reit" | "reits" => Ok(InstrumentClass::Reit),
            other => Err(ParseKeyError::UnknownClass(other.to_string())),
        }
    }
}

/// Identifies one stored series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub code: String,
    pub period: Period,
    pub adjustment: Adjustment,
}

impl SeriesKey {
    pub fn new(code: impl Into<String>, period: Period, adjustment: Adjustment) -> Self {
        Self {
            code: code.into(),
            period,
            adjustment,
        }
    }

    /// Build a key for an instrument class, forcing `Adjustment::None` for
    /// classes that have no adjusted prices.
    pub fn for_class(
        class: InstrumentClass,
        code: impl Into<String>,
        period: Period,
        requested: Adjustment,
    ) -> Self {
        let code = code.into();
        let adjustment = if class.supports_adjustment(requested) {
            requested
        } else {
            tracing::warn!(
                %code,
                %class,
                requested = %requested,
                "{class} data is unadjusted only; ignoring requested adjustment and storing as none"
            );
            Adjustment::None
        };
        Self::new(code, period, adjustment)
    }

    /// Identifier used in failure lists: `<code>_<period>`.
    pub fn task_id(&self) -> String {
        format!("{}_{}", self.code, self.period)
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.code, self.period, self.adjustment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn period_names_match_directory_layout() {
        let names: Vec<&str> = Period::ALL.iter().map(|p| p.dir_name()).collect();
        assert_eq!(names, ["day", "week", "mon", "5m", "15m", "30m", "60m"]);
        for p in Period::ALL {
            assert_eq!(p.dir_name().parse::<Period>(), Ok(p));
        }
    }

    #[test]
    fn period_list_parsing_dedups_and_rejects_unknown() {
        assert_eq!(
            Period::parse_list("day, week,day , mon"),
            Ok(vec![Period::Day, Period::Week, Period::Month])
        );
        assert_eq!(
            Period::parse_list("day,2h"),
            Err(ParseKeyError::UnknownPeriod("2h".into()))
        );
    }

    #[test]
    fn adjustment_aliases() {
        assert_eq!("qfq".parse::<Adjustment>(), Ok(Adjustment::Forward));
        assert_eq!("HFQ".parse::<Adjustment>(), Ok(Adjustment::Backward));
        assert_eq!("none".parse::<Adjustment>(), Ok(Adjustment::None));
        assert!("split".parse::<Adjustment>().is_err());
    }

    #[test]
    fn classification_heuristic() {
        assert_eq!(InstrumentClass::classify("sh.600000"), Some(InstrumentClass::Stock));
        assert_eq!(InstrumentClass::classify("019547"), Some(InstrumentClass::Bond));
        assert_eq!(InstrumentClass::classify("508000"), Some(InstrumentClass::Reit));
        assert_eq!(InstrumentClass::classify("180101"), Some(InstrumentClass::Reit));
        assert_eq!(InstrumentClass::classify("12345"), None);
        assert_eq!(InstrumentClass::classify("abcdef"), None);
    }

    #[test]
    fn bonds_and_reits_are_forced_unadjusted() {
        let key = SeriesKey::for_class(
            InstrumentClass::Bond,
            "019547",
            Period::Day,
            Adjustment::Forward,
        );
        assert_eq!(key.adjustment, Adjustment::None);

        let key = SeriesKey::for_class(
            InstrumentClass::Reit,
            "508000",
            Period::Day,
            Adjustment::Backward,
        );
        assert_eq!(key.adjustment, Adjustment::None);

        let key = SeriesKey::for_class(
            InstrumentClass::Stock,
            "sh.600000",
            Period::Day,
            Adjustment::Forward,
        );
        assert_eq!(key.adjustment, Adjustment::Forward);
    }

    #[test]
    fn only_stocks_have_intraday_periods() {
        assert!(InstrumentClass::Stock.supports_period(Period::Min5));
        assert!(InstrumentClass::Bond.supports_period(Period::Day));
        assert!(!InstrumentClass::Bond.supports_period(Period::Week));
        assert!(!InstrumentClass::Reit.supports_period(Period::Min30));
    }

    #[test]
    fn task_id_format() {
        let key = SeriesKey::new("sh.600000", Period::Week, Adjustment::Forward);
        assert_eq!(key.task_id(), "sh.600000_week");
    }
}
