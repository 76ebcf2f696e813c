//! klinestore runner — batch orchestration on top of `klinestore-core`.
//!
//! This crate provides:
//! - TOML configuration with defaults for every field
//! - The batch orchestrator (bounded rayon pool, retries, pacing, cancellation)
//! - Per-batch `UpdateStats`
//! - Gap repair, the daily schedule and log retention

pub mod config;
pub mod logs;
pub mod orchestrator;
pub mod progress;
pub mod repair;
pub mod schedule;
pub mod stats;

pub use config::{ConfigError, StoreConfig, CONFIG_ENV};
pub use logs::{clean_old_logs, log_file_name};
pub use orchestrator::{
    plan_tasks, BatchError, BatchMode, BatchOptions, BatchRequest, ClassPolicies, Orchestrator,
    SkipReason, Task, TaskError, TaskOutcome,
};
pub use progress::{BatchProgress, LogProgress};
pub use repair::GapCheck;
pub use schedule::{next_run_after, parse_daily_time, run_daily, ScheduleError};
pub use stats::UpdateStats;

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn task_types_cross_threads() {
        assert_send::<Task>();
        assert_sync::<Task>();
        assert_send::<TaskOutcome>();
        assert_send::<TaskError>();
    }

    #[test]
    fn orchestrator_is_sync() {
        assert_sync::<Orchestrator<'static>>();
    }

    #[test]
    fn config_types_are_send_sync() {
        assert_send::<StoreConfig>();
        assert_sync::<StoreConfig>();
        assert_send::<UpdateStats>();
        assert_sync::<UpdateStats>();
    }
}
