//! Range resolution: which dates a series still needs.
//!
//! The decision is a pure function of the latest persisted timestamp, the
//! force-full flag, the class policy and today's date. `RangeResolver` only
//! adds the store lookup.

use crate::domain::{InstrumentClass, SeriesKey};
use crate::store::SeriesStore;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

/// Largest lookback or check window accepted from configuration and flags.
pub const MAX_WINDOW_DAYS: u32 = 36_600;

/// `date` minus `days`, clamped to the earliest representable date.
fn days_before(date: NaiveDate, days: u32) -> NaiveDate {
    date.checked_sub_signed(Duration::days(i64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` days ending at `end` (inclusive of both bounds).
    pub fn trailing(end: NaiveDate, days: u32) -> Self {
        Self::new(days_before(end, days), end)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// Where a full-history refetch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FullHistory {
    /// `days` before today.
    Lookback { days: u32 },
    /// A fixed first date.
    Since(NaiveDate),
}

impl FullHistory {
    pub fn start(&self, today: NaiveDate) -> NaiveDate {
        match *self {
            FullHistory::Lookback { days } => days_before(today, days),
            FullHistory::Since(date) => date.min(today),
        }
    }
}

/// Lookback defaults for one instrument class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolverPolicy {
    /// Window fetched for a series with no prior data.
    pub lookback_days: u32,
    pub full_history: FullHistory,
}

impl ResolverPolicy {
    pub fn for_class(class: InstrumentClass) -> Self {
        match class {
            InstrumentClass::Stock => Self {
                lookback_days: 30,
                full_history: FullHistory::Lookback { days: 5 * 365 },
            },
            InstrumentClass::Bond => Self {
                lookback_days: 90,
                full_history: FullHistory::Since(InstrumentClass::Bond.earliest_history()),
            },
            InstrumentClass::Reit => Self {
                lookback_days: 60,
                full_history: FullHistory::Since(InstrumentClass::Reit.earliest_history()),
            },
        }
    }

    pub fn with_lookback(mut self, days: u32) -> Self {
        self.lookback_days = days;
        self
    }
}

/// Outcome of resolving one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Latest persisted bar is today or later; nothing to fetch.
    AlreadyCurrent,
    /// Fetch `range`. With `replace` set the existing series is deleted
    /// first and the fetched bars become the whole series.
    Fetch { range: DateRange, replace: bool },
}

/// Decide the fetch range from the latest persisted date.
pub fn resolve_range(
    latest: Option<NaiveDate>,
    force_full: bool,
    policy: &ResolverPolicy,
    today: NaiveDate,
) -> Resolution {
    if force_full {
        return Resolution::Fetch {
            range: DateRange::new(policy.full_history.start(today), today),
            replace: true,
        };
    }

    match latest {
        None => Resolution::Fetch {
            range: DateRange::trailing(today, policy.lookback_days),
            replace: false,
        },
        Some(last) => match last.succ_opt() {
            Some(start) if start <= today => Resolution::Fetch {
                range: DateRange::new(start, today),
                replace: false,
            },
            _ => Resolution::AlreadyCurrent,
        },
    }
}

/// Resolves fetch ranges against a store.
pub struct RangeResolver<'a> {
    store: &'a SeriesStore,
    policy: ResolverPolicy,
}

impl<'a> RangeResolver<'a> {
    pub fn new(store: &'a SeriesStore, policy: ResolverPolicy) -> Self {
        Self { store, policy }
    }

    pub fn resolve(&self, key: &SeriesKey, force_full: bool, today: NaiveDate) -> Resolution {
        let latest = if force_full {
            None
        } else {
            self.store.latest_timestamp(key).map(|ts| ts.date())
        };
        resolve_range(latest, force_full, &self.policy, today)
    }
}
