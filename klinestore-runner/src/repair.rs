//! Gap repair: compare a recent window against the provider and refetch
//! the full history of any series that is missing bars.

use crate::orchestrator::{BatchError, BatchMode, BatchRequest, Orchestrator, Task};
use crate::stats::UpdateStats;
use klinestore_core::data::FetchRequest;
use klinestore_core::resolver::DateRange;
use std::time::Instant;
use tracing::{info, warn};

/// Result of checking one series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GapCheck {
    /// No local data to repair.
    Missing,
    Complete { stored: usize, expected: usize },
    Gap { stored: usize, expected: usize },
}

impl Orchestrator<'_> {
    /// Compare the stored bars inside the last `check_days` days with what
    /// the provider returns for the same window.
    pub fn check_gap(&self, task: &Task, check_days: u32) -> Result<GapCheck, crate::TaskError> {
        let existing = self.store().load(&task.key);
        if existing.is_empty() {
            return Ok(GapCheck::Missing);
        }

        let window = DateRange::trailing(self.today(), check_days);
        let stored = existing.iter().filter(|b| window.contains(b.date())).count();
        let request = FetchRequest {
            code: task.key.code.clone(),
            class: task.class,
            period: task.key.period,
            adjustment: task.key.adjustment,
            range: window,
        };
        let expected = self
            .fetch_with_retry(&request)?
            .iter()
            .filter(|b| window.contains(b.date()))
            .count();

        Ok(if expected > stored {
            GapCheck::Gap { stored, expected }
        } else {
            GapCheck::Complete { stored, expected }
        })
    }

    /// Check every series in `request`; series with gaps get a force-full
    /// update. Checked-and-complete series count as skipped.
    pub fn repair(&self, request: &BatchRequest, check_days: u32) -> Result<UpdateStats, BatchError> {
        let started = Instant::now();
        let mut stats = UpdateStats::new();
        if request.codes.is_empty() {
            warn!(class = %request.class, "code list is empty; nothing to repair");
            return Ok(stats);
        }

        self.provider().connect().map_err(BatchError::Session)?;
        let tasks = self.prepare(request);
        info!(tasks = tasks.len(), check_days, "checking for gaps");

        let mut to_repair = Vec::new();
        for (i, task) in tasks.iter().enumerate() {
            if i > 0 && !self.options().delay.is_zero() {
                std::thread::sleep(self.options().delay);
            }
            if !task.class.supports_period(task.key.period) {
                stats.record_skipped();
                continue;
            }
            match self.check_gap(task, check_days) {
                Ok(GapCheck::Missing) => {
                    warn!(task = %task.key.task_id(), "no local data; nothing to repair");
                    stats.record_skipped();
                }
                Ok(GapCheck::Complete { .. }) => stats.record_skipped(),
                Ok(GapCheck::Gap { stored, expected }) => {
                    info!(task = %task.key.task_id(), stored, expected, "gap detected; scheduling full refetch");
                    to_repair.push(task.clone());
                }
                Err(e) => {
                    warn!(task = %task.key.task_id(), error = %e, "gap check failed");
                    stats.record_failed(task.key.task_id());
                }
            }
        }

        let result = self.run_batch(&to_repair, BatchMode::Update { force_full: true });
        self.provider().disconnect();

        stats.merge(result?);
        stats.elapsed = started.elapsed();
        Ok(stats)
    }
}
