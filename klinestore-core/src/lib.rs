//! klinestore core — domain types, the flat-file series store, range resolution
//! and data providers.
//!
//! This crate contains everything needed to keep one local price series current:
//! - Domain types (bars, periods, adjustment types, series keys, instrument classes)
//! - `SeriesStore`: CSV persistence with an optional Parquet mirror
//! - `RangeResolver`: which dates still need fetching for a series
//! - The `DataProvider` trait and the EastMoney HTTP provider
//! - Exchange-prefix resolution and code list files
//!
//! Batch orchestration lives in `klinestore-runner`.

pub mod data;
pub mod domain;
pub mod resolver;
pub mod store;

pub use domain::{
    format_timestamp, parse_timestamp, Adjustment, Bar, InstrumentClass, ParseKeyError, Period,
    SeriesKey, Timestamp,
};
pub use resolver::{
    DateRange, FullHistory, RangeResolver, Resolution, ResolverPolicy, MAX_WINDOW_DAYS,
};
pub use store::{CacheStatistics, MergeOutcome, SeriesStore, StoreError};
