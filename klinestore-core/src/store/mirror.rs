//! Parquet mirror of a CSV series, written and read with polars.

use super::StoreError;
use crate::domain::Bar;
use chrono::DateTime;
use polars::prelude::*;
use std::fs;
use std::path::Path;

const COLUMNS: [&str; 8] = [
    "time_ms", "open", "high", "low", "close", "volume", "turnover", "turnrate",
];

fn mirror_err(context: &str) -> impl Fn(PolarsError) -> StoreError + '_ {
    move |e| StoreError::Mirror(format!("{context}: {e}"))
}

fn bars_to_dataframe(bars: &[Bar]) -> Result<DataFrame, StoreError> {
    let times: Vec<i64> = bars
        .iter()
        .map(|b| b.time.and_utc().timestamp_millis())
        .collect();
    let col = |f: fn(&Bar) -> f64| bars.iter().map(f).collect::<Vec<f64>>();

    DataFrame::new(vec![
        Column::new("time_ms".into(), times),
        Column::new("open".into(), col(|b| b.open)),
        Column::new("high".into(), col(|b| b.high)),
        Column::new("low".into(), col(|b| b.low)),
        Column::new("close".into(), col(|b| b.close)),
        Column::new("volume".into(), col(|b| b.volume)),
        Column::new("turnover".into(), col(|b| b.turnover)),
        Column::new("turnrate".into(), col(|b| b.turnrate)),
    ])
    .map_err(mirror_err("dataframe creation"))
}

/// Write `bars` to `path` through a temp file and rename.
pub(crate) fn write_mirror(path: &Path, bars: &[Bar]) -> Result<(), StoreError> {
    let mut df = bars_to_dataframe(bars)?;
    let tmp = path.with_extension("parquet.tmp");

    let file = fs::File::create(&tmp)
        .map_err(|e| StoreError::Mirror(format!("create {}: {e}", tmp.display())))?;
    if let Err(e) = ParquetWriter::new(file).finish(&mut df) {
        let _ = fs::remove_file(&tmp);
        return Err(StoreError::Mirror(format!("write parquet: {e}")));
    }

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::Mirror(format!("atomic rename failed: {e}"))
    })
}

pub(crate) fn read_mirror(path: &Path) -> Result<Vec<Bar>, StoreError> {
    let file = fs::File::open(path)
        .map_err(|e| StoreError::Mirror(format!("open {}: {e}", path.display())))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(mirror_err("read parquet"))?;

    for name in COLUMNS {
        if df.column(name).is_err() {
            return Err(StoreError::Mirror(format!("missing column '{name}'")));
        }
    }

    let times = df
        .column("time_ms")
        .and_then(|c| c.i64())
        .map_err(mirror_err("time_ms column"))?;
    let float = |name: &str| -> Result<Float64Chunked, StoreError> {
        df.column(name)
            .and_then(|c| c.f64())
            .cloned()
            .map_err(|e| StoreError::Mirror(format!("{name} column: {e}")))
    };
    let open = float("open")?;
    let high = float("high")?;
    let low = float("low")?;
    let close = float("close")?;
    let volume = float("volume")?;
    let turnover = float("turnover")?;
    let turnrate = float("turnrate")?;

    let mut bars = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let ms = times
            .get(i)
            .ok_or_else(|| StoreError::Mirror(format!("null time at row {i}")))?;
        let time = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| StoreError::Mirror(format!("time out of range at row {i}")))?
            .naive_utc();
        bars.push(Bar {
            time,
            open: open.get(i).unwrap_or(0.0),
            high: high.get(i).unwrap_or(0.0),
            low: low.get(i).unwrap_or(0.0),
            close: close.get(i).unwrap_or(0.0),
            volume: volume.get(i).unwrap_or(0.0),
            turnover: turnover.get(i).unwrap_or(0.0),
            turnrate: turnrate.get(i).unwrap_or(0.0),
        });
    }
    Ok(bars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn mirror_preserves_intraday_times() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sh.600000.parquet");
        let time = NaiveDate::from_ymd_opt(2024, 3, 8)
            .unwrap()
            .and_hms_opt(9, 35, 0)
            .unwrap();
        let bars = vec![Bar {
            time,
            open: 10.0,
            high: 10.2,
            low: 9.9,
            close: 10.1,
            volume: 5000.0,
            turnover: 50500.0,
            turnrate: 0.12,
        }];

        write_mirror(&path, &bars).unwrap();
        assert_eq!(read_mirror(&path).unwrap(), bars);
        assert!(!path.with_extension("parquet.tmp").exists());
    }
}
