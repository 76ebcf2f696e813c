//! Batch orchestration: turn (code, period) tasks into fetch + persist runs.
//!
//! Tasks execute on a private fixed-size rayon pool. The calling thread
//! admits tasks, collects completions over a channel, accumulates the
//! statistics and paces admission with the configured delay.

use crate::progress::BatchProgress;
use crate::stats::UpdateStats;
use chrono::{Local, NaiveDate};
use klinestore_core::data::{
    resolve_exchange, strip_exchange_prefix, DataError, DataProvider, FetchRequest,
};
use klinestore_core::resolver::DateRange;
use klinestore_core::store::normalize;
use klinestore_core::{
    Adjustment, Bar, InstrumentClass, Period, RangeResolver, Resolution, ResolverPolicy,
    SeriesKey, SeriesStore, StoreError,
};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, warn};

/// Completions between progress checkpoints in the log.
const CHECKPOINT_EVERY: usize = 10;

/// Pacing and retry settings for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Tasks in flight at once. 1 means strictly sequential.
    pub max_workers: usize,
    /// Pause on the collecting thread after each completion.
    pub delay: Duration,
    /// Total fetch attempts per task, the first one included.
    pub max_attempts: u32,
    /// Pause between attempts of one task.
    pub retry_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_workers: 1,
            delay: Duration::from_millis(200),
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

/// What a batch does with each series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchMode {
    /// Incremental update from the latest stored bar, or a full refetch.
    Update { force_full: bool },
    /// Fixed-range download that overwrites. Existing non-empty series are
    /// left alone unless `force` is set.
    Download {
        start: NaiveDate,
        end: NaiveDate,
        force: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Task {
    pub key: SeriesKey,
    pub class: InstrumentClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyCurrent,
    NoData,
    /// Download mode found an existing series.
    Exists,
    UnsupportedPeriod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Skipped(SkipReason),
    Written {
        /// Bars counted toward `new_records`.
        records: usize,
        fetched: usize,
        replaced: bool,
    },
}

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("fetch failed after {attempts} attempt(s): {source}")]
    Fetch {
        attempts: u32,
        #[source]
        source: DataError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("provider unavailable (circuit breaker open); task not attempted")]
    BreakerOpen,

    #[error("task panicked: {0}")]
    Panicked(String),
}

/// Failures that abort a whole batch.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("provider session failed: {0}")]
    Session(#[source] DataError),

    #[error("failed to build worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Resolver policy per instrument class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassPolicies {
    pub stock: ResolverPolicy,
    pub bond: ResolverPolicy,
    pub reit: ResolverPolicy,
}

impl ClassPolicies {
    pub fn get(&self, class: InstrumentClass) -> ResolverPolicy {
        match class {
            InstrumentClass::Stock => self.stock,
            InstrumentClass::Bond => self.bond,
            InstrumentClass::Reit => self.reit,
        }
    }
}

impl Default for ClassPolicies {
    fn default() -> Self {
        Self {
            stock: ResolverPolicy::for_class(InstrumentClass::Stock),
            bond: ResolverPolicy::for_class(InstrumentClass::Bond),
            reit: ResolverPolicy::for_class(InstrumentClass::Reit),
        }
    }
}

/// Codes, periods and adjustment for one batch of one instrument class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub class: InstrumentClass,
    pub codes: Vec<String>,
    pub periods: Vec<Period>,
    pub adjustment: Adjustment,
}

/// Expand codes x periods into tasks, dropping repeats.
pub fn plan_tasks(
    class: InstrumentClass,
    codes: &[String],
    periods: &[Period],
    adjustment: Adjustment,
) -> Vec<Task> {
    let mut seen = HashSet::new();
    let mut tasks = Vec::with_capacity(codes.len() * periods.len());
    for code in codes {
        for &period in periods {
            let key = SeriesKey::for_class(class, code.as_str(), period, adjustment);
            if seen.insert(key.clone()) {
                tasks.push(Task { key, class });
            }
        }
    }
    tasks
}

pub struct Orchestrator<'a> {
    store: &'a SeriesStore,
    provider: &'a dyn DataProvider,
    options: BatchOptions,
    policies: ClassPolicies,
    today: NaiveDate,
    cancel: Option<&'a AtomicBool>,
    progress: Option<&'a dyn BatchProgress>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: &'a SeriesStore, provider: &'a dyn DataProvider, options: BatchOptions) -> Self {
        Self {
            store,
            provider,
            options,
            policies: ClassPolicies::default(),
            today: Local::now().date_naive(),
            cancel: None,
            progress: None,
        }
    }

    pub fn with_policies(mut self, policies: ClassPolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Pin "today" (ranges end here).
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Stop admitting tasks once `cancel` is set.
    pub fn with_cancel(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_progress(mut self, progress: &'a dyn BatchProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn store(&self) -> &SeriesStore {
        self.store
    }

    pub fn provider(&self) -> &dyn DataProvider {
        self.provider
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Connect, normalize codes, plan tasks, run them, disconnect.
    ///
    /// An empty code list logs a warning and returns empty statistics
    /// without touching the provider.
    pub fn run(&self, request: &BatchRequest, mode: BatchMode) -> Result<UpdateStats, BatchError> {
        let started = Instant::now();
        if request.codes.is_empty() {
            warn!(class = %request.class, "code list is empty; nothing to do");
            return Ok(UpdateStats::new());
        }

        self.provider.connect().map_err(BatchError::Session)?;
        let tasks = self.prepare(request);
        info!(
            provider = self.provider.name(),
            class = %request.class,
            codes = request.codes.len(),
            periods = ?request.periods.iter().map(|p| p.dir_name()).collect::<Vec<_>>(),
            tasks = tasks.len(),
            mode = ?mode,
            "starting batch"
        );

        let result = self.run_batch(&tasks, mode);
        self.provider.disconnect();

        let mut stats = result?;
        stats.elapsed = started.elapsed();
        Ok(stats)
    }

    /// Normalize the request's codes and expand them into tasks. Expects a
    /// connected provider (stock codes may be probed).
    pub fn prepare(&self, request: &BatchRequest) -> Vec<Task> {
        let adjustment = if request.class.supports_adjustment(request.adjustment) {
            request.adjustment
        } else {
            warn!(
                class = %request.class,
                requested = %request.adjustment,
                "{} data is unadjusted only; using none",
                request.class
            );
            Adjustment::None
        };
        let codes = self.normalize_codes(request.class, &request.codes);
        plan_tasks(request.class, &codes, &request.periods, adjustment)
    }

    fn normalize_codes(&self, class: InstrumentClass, codes: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        codes
            .iter()
            .map(|code| match class {
                InstrumentClass::Stock => resolve_exchange(self.provider, code, self.today),
                InstrumentClass::Bond | InstrumentClass::Reit => {
                    strip_exchange_prefix(code).to_string()
                }
            })
            .filter(|code| seen.insert(code.clone()))
            .collect()
    }

    /// Run already-planned tasks. Never fails because of a task; only pool
    /// construction can fail.
    pub fn run_batch(&self, tasks: &[Task], mode: BatchMode) -> Result<UpdateStats, BatchError> {
        let started = Instant::now();
        let mut stats = UpdateStats::new();
        let total = tasks.len();
        if total == 0 {
            return Ok(stats);
        }

        let workers = self.options.max_workers.clamp(1, total);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("klinestore-worker-{i}"))
            .build()?;

        let (tx, rx) = mpsc::channel::<(usize, Result<TaskOutcome, TaskError>)>();
        let mut next = 0usize;

        pool.in_place_scope(|scope| {
            let mut in_flight = 0usize;
            let mut completed = 0usize;

            loop {
                while in_flight < workers
                    && next < total
                    && !self.is_cancelled()
                    && self.provider.is_available()
                {
                    let index = next;
                    let task = &tasks[index];
                    next += 1;
                    in_flight += 1;
                    if let Some(p) = self.progress {
                        p.on_start(task, index, total);
                    }

                    let tx = tx.clone();
                    scope.spawn(move |_| {
                        let result = catch_unwind(AssertUnwindSafe(|| self.run_task(task, mode)))
                            .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(&*payload))));
                        let _ = tx.send((index, result));
                    });
                }

                if in_flight == 0 {
                    break;
                }
                let Ok((index, result)) = rx.recv() else {
                    break;
                };
                in_flight -= 1;
                completed += 1;

                let task = &tasks[index];
                record(&mut stats, task, &result);
                if let Some(p) = self.progress {
                    p.on_complete(task, completed, total, &result);
                }

                if completed % CHECKPOINT_EVERY == 0 {
                    info!(
                        completed,
                        total,
                        progress = format!("{:.1}%", completed as f64 / total as f64 * 100.0),
                        "update progress"
                    );
                }

                if next < total && !self.options.delay.is_zero() {
                    std::thread::sleep(self.options.delay);
                }
            }
        });

        if next < total {
            let remaining = &tasks[next..];
            if self.is_cancelled() {
                warn!(remaining = remaining.len(), "batch cancelled; remaining tasks not started");
            } else {
                error!(
                    provider = self.provider.name(),
                    remaining = remaining.len(),
                    cooldown_secs = self.provider.cooldown_remaining().map(|d| d.as_secs()),
                    "circuit breaker open; marking remaining tasks failed"
                );
                for task in remaining {
                    let result = Err(TaskError::BreakerOpen);
                    record(&mut stats, task, &result);
                }
            }
        }

        stats.elapsed = started.elapsed();
        if let Some(p) = self.progress {
            p.on_batch_complete(&stats);
        }
        Ok(stats)
    }

    /// Execute one task on the current thread.
    pub fn run_task(&self, task: &Task, mode: BatchMode) -> Result<TaskOutcome, TaskError> {
        let key = &task.key;
        if !task.class.supports_period(key.period) {
            warn!(task = %key.task_id(), class = %task.class, "period not available for this class; skipping");
            return Ok(TaskOutcome::Skipped(SkipReason::UnsupportedPeriod));
        }

        let (range, replace) = match mode {
            BatchMode::Update { force_full } => {
                let resolver = RangeResolver::new(self.store, self.policies.get(task.class));
                match resolver.resolve(key, force_full, self.today) {
                    Resolution::AlreadyCurrent => {
                        info!(task = %key.task_id(), "already current; skipping");
                        return Ok(TaskOutcome::Skipped(SkipReason::AlreadyCurrent));
                    }
                    Resolution::Fetch { range, replace } => {
                        if replace {
                            self.store.delete(key)?;
                        }
                        (range, replace)
                    }
                }
            }
            BatchMode::Download { start, end, force } => {
                if !force && self.store.exists(key) {
                    info!(task = %key.task_id(), "already downloaded; skipping");
                    return Ok(TaskOutcome::Skipped(SkipReason::Exists));
                }
                (DateRange::new(start, end), true)
            }
        };

        let request = FetchRequest {
            code: key.code.clone(),
            class: task.class,
            period: key.period,
            adjustment: key.adjustment,
            range,
        };
        let bars: Vec<Bar> = self
            .fetch_with_retry(&request)?
            .into_iter()
            .filter(|b| range.contains(b.date()))
            .collect();

        if bars.is_empty() {
            info!(task = %key.task_id(), start = %range.start, end = %range.end, "no new data");
            return Ok(TaskOutcome::Skipped(SkipReason::NoData));
        }

        let fetched = bars.len();
        if replace {
            let bars = normalize(bars);
            self.store.save(key, &bars)?;
            info!(task = %key.task_id(), records = bars.len(), "full write");
            Ok(TaskOutcome::Written {
                records: bars.len(),
                fetched,
                replaced: true,
            })
        } else {
            let outcome = self.store.append_merge(key, bars)?;
            info!(task = %key.task_id(), fetched, records = outcome.added, "incremental update");
            Ok(TaskOutcome::Written {
                records: outcome.added,
                fetched,
                replaced: false,
            })
        }
    }

    /// Fetch with up to `max_attempts` tries, fixed delay between them, for
    /// retryable errors only.
    pub fn fetch_with_retry(&self, request: &FetchRequest) -> Result<Vec<Bar>, TaskError> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            if !self.provider.is_available() {
                return Err(TaskError::BreakerOpen);
            }
            match self.provider.fetch(request) {
                Ok(bars) => return Ok(bars),
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(
                        code = %request.code,
                        period = %request.period,
                        attempt,
                        max_attempts,
                        error = %e,
                        "fetch failed; retrying"
                    );
                    std::thread::sleep(self.options.retry_delay);
                }
                Err(source) => {
                    error!(
                        code = %request.code,
                        period = %request.period,
                        attempts = attempt,
                        error = %source,
                        "fetch failed"
                    );
                    return Err(TaskError::Fetch {
                        attempts: attempt,
                        source,
                    });
                }
            }
        }
    }
}

fn record(stats: &mut UpdateStats, task: &Task, result: &Result<TaskOutcome, TaskError>) {
    match result {
        Ok(TaskOutcome::Skipped(_)) => stats.record_skipped(),
        Ok(TaskOutcome::Written { records, .. }) => stats.record_written(*records),
        Err(e) => {
            error!(task = %task.key.task_id(), error = %e, "task failed");
            stats.record_failed(task.key.task_id());
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_dedups_and_forces_bond_adjustment() {
        let codes = vec!["019547".to_string(), "019547".to_string()];
        let tasks = plan_tasks(
            InstrumentClass::Bond,
            &codes,
            &[Period::Day, Period::Day],
            Adjustment::Forward,
        );
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].key.adjustment, Adjustment::None);
    }

    #[test]
    fn planning_is_codes_times_periods() {
        let codes = vec!["sh.600000".to_string(), "sz.000001".to_string()];
        let tasks = plan_tasks(
            InstrumentClass::Stock,
            &codes,
            &[Period::Day, Period::Week, Period::Month],
            Adjustment::Forward,
        );
        assert_eq!(tasks.len(), 6);
        assert_eq!(tasks[0].key.task_id(), "sh.600000_day");
        assert_eq!(tasks[5].key.task_id(), "sz.000001_mon");
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(&"boom"), "boom");
        assert_eq!(panic_message(&String::from("bang")), "bang");
        assert_eq!(panic_message(&42u8), "unknown panic");
    }
}
