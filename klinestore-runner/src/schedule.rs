//! Daily schedule: run a job every day at a fixed local time.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Longest single sleep while waiting, so cancellation is noticed promptly.
const POLL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("invalid time '{0}' (expected HH:MM)")]
    InvalidTime(String),
}

pub fn parse_daily_time(raw: &str) -> Result<NaiveTime, ScheduleError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .map_err(|_| ScheduleError::InvalidTime(raw.to_string()))
}

/// First occurrence of `at` strictly after `now`.
pub fn next_run_after(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

/// Run `job` every day at `at` until `cancel` is set.
pub fn run_daily<F: FnMut()>(at: NaiveTime, cancel: Option<&AtomicBool>, mut job: F) {
    let cancelled = || cancel.is_some_and(|f| f.load(Ordering::Relaxed));
    info!(at = %at.format("%H:%M"), "daily schedule armed");

    while !cancelled() {
        let next = next_run_after(Local::now().naive_local(), at);
        info!(next = %next, "next scheduled run");

        loop {
            if cancelled() {
                info!("schedule stopped");
                return;
            }
            let now = Local::now().naive_local();
            if now >= next {
                break;
            }
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
            std::thread::sleep(wait.min(POLL));
        }

        info!("scheduled run starting");
        job();
    }
    info!("schedule stopped");
}
