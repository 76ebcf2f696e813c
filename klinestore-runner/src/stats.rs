//! Per-batch update statistics.

use serde::Serialize;
use std::time::Duration;

/// Counters for one batch. Created fresh per call and returned by value.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateStats {
    /// Tasks that fetched and persisted data.
    pub success_count: usize,
    pub failed_count: usize,
    /// Tasks with nothing to do (already current, empty result, existing file).
    pub skipped_count: usize,
    /// Series whose file changed.
    pub updated_count: usize,
    /// Net bars written: merge delta for incremental updates, fetched count
    /// for overwrites.
    pub new_records: usize,
    /// `<code>_<period>` for every failed task.
    pub failed_keys: Vec<String>,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

impl UpdateStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_written(&mut self, records: usize) {
        self.success_count += 1;
        self.updated_count += 1;
        self.new_records += records;
    }

    pub fn record_skipped(&mut self) {
        self.skipped_count += 1;
    }

    pub fn record_failed(&mut self, task_id: impl Into<String>) {
        self.failed_count += 1;
        self.failed_keys.push(task_id.into());
    }

    /// Tasks accounted for so far.
    pub fn completed(&self) -> usize {
        self.success_count + self.failed_count + self.skipped_count
    }

    /// Fold another batch into this one (used when a command runs several
    /// batches, e.g. one per adjustment).
    pub fn merge(&mut self, other: UpdateStats) {
        self.success_count += other.success_count;
        self.failed_count += other.failed_count;
        self.skipped_count += other.skipped_count;
        self.updated_count += other.updated_count;
        self.new_records += other.new_records;
        self.failed_keys.extend(other.failed_keys);
        self.elapsed += other.elapsed;
    }

    pub fn success_rate(&self) -> f64 {
        let done = self.completed();
        if done == 0 {
            0.0
        } else {
            ((self.success_count + self.skipped_count) as f64 / done as f64) * 100.0
        }
    }

    pub fn log_summary(&self, operation: &str) {
        tracing::info!(
            operation,
            success = self.success_count,
            failed = self.failed_count,
            skipped = self.skipped_count,
            updated = self.updated_count,
            new_records = self.new_records,
            success_rate = format!("{:.1}%", self.success_rate()),
            elapsed = format!("{:.1}s", self.elapsed.as_secs_f64()),
            "batch finished"
        );
        if !self.failed_keys.is_empty() {
            tracing::warn!(failed = ?self.failed_keys, "failed tasks");
        }
    }
}
