//! Progress callbacks for batch runs.

use crate::orchestrator::{Task, TaskError, TaskOutcome};
use crate::stats::UpdateStats;

/// Called from the collecting thread only, in completion order.
pub trait BatchProgress: Send + Sync {
    /// A task was handed to a worker.
    fn on_start(&self, _task: &Task, _index: usize, _total: usize) {}

    fn on_complete(
        &self,
        task: &Task,
        completed: usize,
        total: usize,
        result: &Result<TaskOutcome, TaskError>,
    );

    fn on_batch_complete(&self, _stats: &UpdateStats) {}
}

/// Reports each completion through `tracing` at debug level.
pub struct LogProgress;

impl BatchProgress for LogProgress {
    fn on_complete(
        &self,
        task: &Task,
        completed: usize,
        total: usize,
        result: &Result<TaskOutcome, TaskError>,
    ) {
        match result {
            Ok(outcome) => tracing::debug!(
                task = %task.key.task_id(),
                completed,
                total,
                outcome = ?outcome,
                "task done"
            ),
            Err(e) => tracing::debug!(
                task = %task.key.task_id(),
                completed,
                total,
                error = %e,
                "task failed"
            ),
        }
    }
}
