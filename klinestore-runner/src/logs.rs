//! Log file naming and retention.

use chrono::NaiveDate;
use std::fs;
use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::{debug, info};

/// `offline_data_YYYYMMDD.log`
pub fn log_file_name(date: NaiveDate) -> String {
    format!("offline_data_{}.log", date.format("%Y%m%d"))
}

/// Delete `*.log` files in `dir` last modified more than `days` days before
/// `now`. Returns how many were removed. A missing directory removes nothing.
pub fn clean_old_logs(dir: &Path, days: u32, now: SystemTime) -> io::Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    let max_age = Duration::from_secs(u64::from(days) * 24 * 60 * 60);

    let mut removed = 0;
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age > max_age {
            fs::remove_file(&path)?;
            debug!(path = %path.display(), "removed old log");
            removed += 1;
        }
    }
    info!(dir = %dir.display(), removed, days, "log cleanup finished");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daily_log_name() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 8).unwrap();
        assert_eq!(log_file_name(d), "offline_data_20240308.log");
    }

    #[test]
    fn removes_only_old_log_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("offline_data_20240101.log"), "x").unwrap();
        fs::write(dir.path().join("notes.txt"), "x").unwrap();

        // Nothing is older than 30 days yet.
        assert_eq!(clean_old_logs(dir.path(), 30, SystemTime::now()).unwrap(), 0);

        let later = SystemTime::now() + Duration::from_secs(31 * 24 * 60 * 60);
        assert_eq!(clean_old_logs(dir.path(), 30, later).unwrap(), 1);
        assert!(dir.path().join("notes.txt").exists());
        assert!(!dir.path().join("offline_data_20240101.log").exists());
    }

    #[test]
    fn missing_dir_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(clean_old_logs(&dir.path().join("nope"), 30, SystemTime::now()).unwrap(), 0);
    }
}
