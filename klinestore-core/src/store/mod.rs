//! Flat-file series store.
//!
//! Layout: `{root}/{adjustment}/{period}/{code}.csv`, header
//! `time,open,high,low,close,volume,turnover,turnrate`.
//!
//! - Writes are atomic (write `.tmp`, rename into place)
//! - Reads degrade to an empty series on I/O trouble; malformed rows are skipped
//! - Optional Parquet mirror next to each CSV for faster reads

mod merge;
mod mirror;
mod stats;

pub use merge::{merge_bars, normalize};
pub use stats::CacheStatistics;

use crate::domain::{
    format_timestamp, parse_timestamp, Adjustment, Bar, InstrumentClass, Period, SeriesKey,
    Timestamp,
};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

pub const CSV_HEADER: [&str; 8] = [
    "time", "open", "high", "low", "close", "volume", "turnover", "turnrate",
];

/// Write-path failures. Read paths never fail; they log and return empty.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error on {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("parquet mirror error: {0}")]
    Mirror(String),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        StoreError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result of an append-merge.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    /// The series as persisted after the merge.
    pub series: Vec<Bar>,
    /// Net number of bars added (overwrites do not count).
    pub added: usize,
}

/// The local series store.
#[derive(Debug, Clone)]
pub struct SeriesStore {
    root: PathBuf,
    mirror: bool,
}

impl SeriesStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mirror: false,
        }
    }

    /// Enable or disable the Parquet mirror written after each save.
    pub fn with_mirror(mut self, mirror: bool) -> Self {
        self.mirror = mirror;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mirror_enabled(&self) -> bool {
        self.mirror
    }

    fn series_dir(&self, adjustment: Adjustment, period: Period) -> PathBuf {
        self.root.join(adjustment.dir_name()).join(period.dir_name())
    }

    /// `{root}/{adjustment}/{period}/{code}.csv`
    pub fn series_path(&self, key: &SeriesKey) -> PathBuf {
        self.series_dir(key.adjustment, key.period)
            .join(format!("{}.csv", key.code))
    }

    pub fn mirror_path(&self, key: &SeriesKey) -> PathBuf {
        self.series_dir(key.adjustment, key.period)
            .join(format!("{}.parquet", key.code))
    }

    /// All persisted bars for `key`, in file order.
    ///
    /// Missing file: empty. Unreadable file: empty plus a warning. Rows that
    /// cannot be parsed are skipped with a warning.
    pub fn load(&self, key: &SeriesKey) -> Vec<Bar> {
        let path = self.series_path(key);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(key = %key, "no local series");
                return Vec::new();
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to open series; treating as empty");
                return Vec::new();
            }
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut bars = Vec::new();
        let mut skipped = 0usize;
        for (line, record) in reader.records().enumerate() {
            match record {
                Ok(record) => match parse_row(&record) {
                    Some(bar) => bars.push(bar),
                    None => {
                        skipped += 1;
                        debug!(path = %path.display(), row = line + 1, "skipping malformed row");
                    }
                },
                Err(e) => {
                    if e.is_io_error() {
                        warn!(path = %path.display(), error = %e, "read error; treating series as empty");
                        return Vec::new();
                    }
                    skipped += 1;
                    debug!(path = %path.display(), row = line + 1, error = %e, "skipping unreadable row");
                }
            }
        }

        if skipped > 0 {
            warn!(path = %path.display(), skipped, kept = bars.len(), "skipped malformed rows");
        }
        bars
    }

    /// Replace the series for `key` with `bars`, in the given order.
    pub fn save(&self, key: &SeriesKey, bars: &[Bar]) -> Result<(), StoreError> {
        let path = self.series_path(key);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
        }

        let tmp = path.with_extension("csv.tmp");
        if let Err(e) = write_csv(&tmp, bars) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            StoreError::io(&path, e)
        })?;

        debug!(key = %key, records = bars.len(), "saved series");

        if self.mirror {
            self.refresh_mirror(key, bars);
        } else {
            // An older mirror no longer matches the CSV.
            remove_if_present(&self.mirror_path(key));
        }
        Ok(())
    }

    fn refresh_mirror(&self, key: &SeriesKey, bars: &[Bar]) {
        let path = self.mirror_path(key);
        if let Err(e) = mirror::write_mirror(&path, bars) {
            warn!(key = %key, error = %e, "mirror write failed; removing stale mirror");
            remove_if_present(&path);
        }
    }

    /// Merge `new_bars` into the stored series and persist the result.
    pub fn append_merge(
        &self,
        key: &SeriesKey,
        new_bars: Vec<Bar>,
    ) -> Result<MergeOutcome, StoreError> {
        let existing = self.load(key);
        let before = existing.len();
        let merged = merge_bars(existing, new_bars);
        self.save(key, &merged)?;
        Ok(MergeOutcome {
            added: merged.len().saturating_sub(before),
            series: merged,
        })
    }

    /// Timestamp of the last persisted bar.
    pub fn latest_timestamp(&self, key: &SeriesKey) -> Option<Timestamp> {
        self.load(key).iter().map(|b| b.time).max()
    }

    /// Remove the series and its mirror. Removing an absent series is not an error.
    pub fn delete(&self, key: &SeriesKey) -> Result<(), StoreError> {
        for path in [self.series_path(key), self.mirror_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }
        Ok(())
    }

    /// True when the series file exists and holds at least one bar.
    pub fn exists(&self, key: &SeriesKey) -> bool {
        let path = self.series_path(key);
        match fs::metadata(&path) {
            Ok(meta) if meta.len() > 0 => {}
            _ => return false,
        }
        let Ok(mut reader) = csv::ReaderBuilder::new().flexible(true).from_path(&path) else {
            return false;
        };
        let mut record = csv::StringRecord::new();
        matches!(reader.read_record(&mut record), Ok(true))
    }

    /// Codes stored under `adjustment` for any period, optionally filtered
    /// by instrument class. Sorted and de-duplicated.
    pub fn list_codes(
        &self,
        adjustment: Adjustment,
        class: Option<InstrumentClass>,
    ) -> Vec<String> {
        let mut codes = BTreeSet::new();
        for period in Period::ALL {
            let dir = self.series_dir(adjustment, period);
            let Ok(entries) = fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(code) = name.to_str().and_then(|n| n.strip_suffix(".csv")) else {
                    continue;
                };
                if code.is_empty() {
                    continue;
                }
                let keep = match class {
                    None => true,
                    Some(c) => InstrumentClass::classify(code) == Some(c),
                };
                if keep {
                    codes.insert(code.to_string());
                }
            }
        }
        codes.into_iter().collect()
    }

    /// Like [`load`](Self::load) but reads the Parquet mirror when it is at
    /// least as new as the CSV.
    pub fn load_fast(&self, key: &SeriesKey) -> Vec<Bar> {
        let mirror = self.mirror_path(key);
        if mirror_is_fresh(&mirror, &self.series_path(key)) {
            match mirror::read_mirror(&mirror) {
                Ok(bars) => return bars,
                Err(e) => warn!(key = %key, error = %e, "mirror unreadable; falling back to CSV"),
            }
        }
        self.load(key)
    }

    /// Bars for `key` with dates inside the inclusive bounds.
    pub fn read_range(
        &self,
        key: &SeriesKey,
        begin: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Vec<Bar> {
        self.load_fast(key)
            .into_iter()
            .filter(|b| begin.map_or(true, |s| b.date() >= s))
            .filter(|b| end.map_or(true, |e| b.date() <= e))
            .collect()
    }

    /// Summary of everything under the root.
    pub fn statistics(&self) -> CacheStatistics {
        stats::collect(&self.root)
    }
}

fn write_csv(path: &Path, bars: &[Bar]) -> Result<(), StoreError> {
    let file = fs::File::create(path).map_err(|e| StoreError::io(path, e))?;
    let mut writer = csv::Writer::from_writer(file);
    writer
        .write_record(CSV_HEADER)
        .map_err(|e| StoreError::csv(path, e))?;
    for bar in bars {
        writer
            .write_record([
                format_timestamp(&bar.time, None),
                bar.open.to_string(),
                bar.high.to_string(),
                bar.low.to_string(),
                bar.close.to_string(),
                bar.volume.to_string(),
                bar.turnover.to_string(),
                bar.turnrate.to_string(),
            ])
            .map_err(|e| StoreError::csv(path, e))?;
    }
    writer.flush().map_err(|e| StoreError::io(path, e))
}

fn parse_row(record: &csv::StringRecord) -> Option<Bar> {
    if record.len() < CSV_HEADER.len() {
        return None;
    }
    let time = parse_timestamp(record.get(0)?)?;
    let num = |i: usize| -> Option<f64> {
        let raw = record.get(i)?;
        if raw.is_empty() {
            Some(0.0)
        } else {
            raw.parse::<f64>().ok()
        }
    };
    Some(Bar {
        time,
        open: num(1)?,
        high: num(2)?,
        low: num(3)?,
        close: num(4)?,
        volume: num(5)?,
        turnover: num(6)?,
        turnrate: num(7)?,
    })
}

fn mirror_is_fresh(mirror: &Path, csv: &Path) -> bool {
    let modified = |p: &Path| fs::metadata(p).and_then(|m| m.modified()).ok();
    match (modified(mirror), modified(csv)) {
        (Some(m), Some(c)) => m >= c,
        _ => false,
    }
}

fn remove_if_present(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SeriesKey {
        SeriesKey::new("sh.600000", Period::Day, Adjustment::Forward)
    }

    fn bar(day: u32, close: f64) -> Bar {
        Bar::daily(
            NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            close - 0.5,
            close + 0.5,
            close - 1.0,
            close,
            1000.0,
        )
    }

    #[test]
    fn path_layout() {
        let store = SeriesStore::new("/data/offline");
        assert_eq!(
            store.series_path(&key()),
            PathBuf::from("/data/offline/qfq/day/sh.600000.csv")
        );
        assert_eq!(
            store.mirror_path(&key()),
            PathBuf::from("/data/offline/qfq/day/sh.600000.parquet")
        );
    }

    #[test]
    fn load_missing_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        assert!(store.load(&key()).is_empty());
        assert_eq!(store.latest_timestamp(&key()), None);
        assert!(!store.exists(&key()));
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let path = store.series_path(&key());
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            "time,open,high,low,close,volume,turnover,turnrate\n\
             2024-03-04,1,2,0.5,1.5,100,,\n\
             garbage,1,2,3\n\
             2024-03-05,x,2,0.5,1.5,100,0,0\n\
             2024-03-06,1,2,0.5,1.7,100,170,0.1\n",
        )
        .unwrap();

        let bars = store.load(&key());
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].turnover, 0.0);
        assert_eq!(bars[1].close, 1.7);
    }

    #[test]
    fn save_writes_header_and_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store.save(&key(), &[bar(4, 10.0)]).unwrap();

        let path = store.series_path(&key());
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("time,open,high,low,close,volume,turnover,turnrate\n"));
        assert!(text.contains("2024-03-04,9.5,10.5,9,10,1000,0,0"));
        assert!(!path.with_extension("csv.tmp").exists());
    }

    #[test]
    fn append_merge_counts_only_new_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store.save(&key(), &[bar(4, 10.0), bar(5, 11.0)]).unwrap();

        let outcome = store
            .append_merge(&key(), vec![bar(5, 11.5), bar(6, 12.0)])
            .unwrap();
        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.series.len(), 3);
        assert_eq!(outcome.series[1].close, 11.5);
        assert_eq!(store.load(&key()), outcome.series);
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path()).with_mirror(true);
        store.save(&key(), &[bar(4, 10.0)]).unwrap();
        assert!(store.mirror_path(&key()).exists());

        store.delete(&key()).unwrap();
        assert!(!store.series_path(&key()).exists());
        assert!(!store.mirror_path(&key()).exists());
        store.delete(&key()).unwrap();
    }

    #[test]
    fn header_only_file_does_not_exist() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        store.save(&key(), &[]).unwrap();
        assert!(!store.exists(&key()));
        store.save(&key(), &[bar(4, 1.0)]).unwrap();
        assert!(store.exists(&key()));
    }

    #[test]
    fn list_codes_keeps_dotted_codes_and_filters_by_class() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let b = [bar(4, 1.0)];
        store
            .save(&SeriesKey::new("sh.600000", Period::Day, Adjustment::None), &b)
            .unwrap();
        store
            .save(&SeriesKey::new("sz.000001", Period::Week, Adjustment::None), &b)
            .unwrap();
        store
            .save(&SeriesKey::new("019547", Period::Day, Adjustment::None), &b)
            .unwrap();
        store
            .save(&SeriesKey::new("508000", Period::Day, Adjustment::None), &b)
            .unwrap();

        assert_eq!(
            store.list_codes(Adjustment::None, Some(InstrumentClass::Stock)),
            ["sh.600000", "sz.000001"]
        );
        assert_eq!(
            store.list_codes(Adjustment::None, Some(InstrumentClass::Bond)),
            ["019547"]
        );
        assert_eq!(store.list_codes(Adjustment::None, None).len(), 4);
        assert!(store.list_codes(Adjustment::Forward, None).is_empty());
    }

    #[test]
    fn read_range_filters_inclusively() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path()).with_mirror(true);
        store
            .save(&key(), &[bar(4, 1.0), bar(5, 2.0), bar(6, 3.0), bar(7, 4.0)])
            .unwrap();

        let d = |day| NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
        let closes: Vec<f64> = store
            .read_range(&key(), Some(d(5)), Some(d(6)))
            .iter()
            .map(|b| b.close)
            .collect();
        assert_eq!(closes, [2.0, 3.0]);
        assert_eq!(store.read_range(&key(), None, Some(d(4))).len(), 1);
        assert_eq!(store.read_range(&key(), Some(d(7)), None).len(), 1);
    }

    #[test]
    fn csv_only_save_drops_the_old_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let mirrored = SeriesStore::new(dir.path()).with_mirror(true);
        mirrored.save(&key(), &[bar(4, 1.0)]).unwrap();
        assert!(mirrored.mirror_path(&key()).exists());

        let plain = SeriesStore::new(dir.path());
        assert!(!plain.mirror_enabled());
        plain.save(&key(), &[bar(4, 1.0), bar(5, 2.0)]).unwrap();

        assert!(!plain.mirror_path(&key()).exists());
        assert_eq!(mirrored.load_fast(&key()), plain.load(&key()));
        assert_eq!(plain.load_fast(&key()).len(), 2);
    }

    #[test]
    fn load_fast_ignores_stale_mirror() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path()).with_mirror(true);
        store.save(&key(), &[bar(4, 1.0)]).unwrap();

        // CSV rewritten behind the store's back.
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let path = store.series_path(&key());
        fs::write(
            &path,
            "time,open,high,low,close,volume,turnover,turnrate\n\
             2024-03-04,1,2,0.5,1.5,100,0,0\n\
             2024-03-05,1,2,0.5,1.7,100,0,0\n",
        )
        .unwrap();

        assert_eq!(store.load_fast(&key()).len(), 2);
    }

    #[test]
    fn unreadable_series_path_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        fs::create_dir_all(store.series_path(&key())).unwrap();

        assert!(store.load(&key()).is_empty());
        assert!(!store.exists(&key()));
        assert_eq!(store.latest_timestamp(&key()), None);
    }

    #[test]
    fn save_into_blocked_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = SeriesStore::new(dir.path());
        let series_dir = store.series_path(&key()).parent().unwrap().to_path_buf();
        fs::create_dir_all(series_dir.parent().unwrap()).unwrap();
        fs::write(&series_dir, "not a directory").unwrap();

        assert!(store.save(&key(), &[bar(4, 1.0)]).is_err());
        assert!(store.append_merge(&key(), vec![bar(4, 1.0)]).is_err());
    }
}
