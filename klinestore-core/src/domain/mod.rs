//! Domain types for klinestore

pub mod bar;
pub mod key;
pub mod time;

pub use bar::Bar;
pub use key::{Adjustment, InstrumentClass, ParseKeyError, Period, SeriesKey};
pub use time::{at_midnight, format_timestamp, parse_timestamp, Timestamp};
