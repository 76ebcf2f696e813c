//! Store-wide statistics for `klinestore status`.

use chrono::{DateTime, Local, NaiveDateTime};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Aggregate view of the files under a store root.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStatistics {
    /// Number of CSV series files.
    pub total_files: usize,
    pub total_size_mb: f64,
    /// Distinct codes across every adjustment and period.
    pub code_count: usize,
    /// Period directory names that contain at least one series.
    pub periods: Vec<String>,
    /// Most recent modification time of any series file.
    pub last_update: Option<NaiveDateTime>,
}

pub(super) fn collect(root: &Path) -> CacheStatistics {
    let mut total_files = 0usize;
    let mut total_bytes = 0u64;
    let mut codes = BTreeSet::new();
    let mut periods = BTreeSet::new();
    let mut last_update: Option<NaiveDateTime> = None;

    for adjustment_dir in subdirs(root) {
        for period_dir in subdirs(&adjustment_dir) {
            let Ok(entries) = fs::read_dir(&period_dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(code) = name.to_str().and_then(|n| n.strip_suffix(".csv")) else {
                    continue;
                };
                let Ok(meta) = entry.metadata() else {
                    continue;
                };

                total_files += 1;
                total_bytes += meta.len();
                codes.insert(code.to_string());
                if let Some(p) = period_dir.file_name().and_then(|n| n.to_str()) {
                    periods.insert(p.to_string());
                }
                if let Ok(modified) = meta.modified() {
                    let local = DateTime::<Local>::from(modified).naive_local();
                    last_update = Some(last_update.map_or(local, |t| t.max(local)));
                }
            }
        }
    }

    CacheStatistics {
        total_files,
        total_size_mb: total_bytes as f64 / (1024.0 * 1024.0),
        code_count: codes.len(),
        periods: periods.into_iter().collect(),
        last_update,
    }
}

fn subdirs(dir: &Path) -> Vec<std::path::PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect()
}
