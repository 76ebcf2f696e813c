//! klinestore CLI — maintain an offline store of daily and intraday K-lines.
//!
//! Commands:
//! - `download`: fetch a fixed date range and overwrite each series
//! - `update`: bring series up to date from their latest stored bar
//! - `repair`: refetch series with bars missing from the recent window
//! - `schedule`: run the `update` job every day at a fixed time
//! - `status`: report store size, code count and periods
//! - `clean-logs`: delete old log files
//! - `show`: print a stored series

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use klinestore_core::data::{read_code_file, split_code_arg, EastMoneyProvider};
use klinestore_core::{
    format_timestamp, Adjustment, InstrumentClass, Period, SeriesKey, SeriesStore, MAX_WINDOW_DAYS,
};
use klinestore_runner::{
    clean_old_logs, log_file_name, parse_daily_time, run_daily, BatchMode, BatchOptions,
    BatchRequest, LogProgress, Orchestrator, StoreConfig, UpdateStats,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, SystemTime};
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "klinestore",
    about = "klinestore — offline K-line store for A-share stocks, bonds and REITs"
)]
struct Cli {
    /// Path to a TOML config file. Falls back to $KLINESTORE_CONFIG, then defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset (e.g. info, debug, klinestore_runner=debug).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Print batch results as JSON on stdout.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Which series a batch touches.
#[derive(Args, Debug, Clone)]
struct SelectArgs {
    /// Instrument class: stock, bond or reit.
    #[arg(long, default_value = "stock")]
    asset: InstrumentClass,

    /// Codes, comma separated (e.g. sh.600000,000001).
    #[arg(long)]
    codes: Option<String>,

    /// File with one code per line; `#` starts a comment.
    #[arg(long)]
    codes_file: Option<PathBuf>,

    /// Every code already stored for this class and adjustment.
    #[arg(long, default_value_t = false)]
    all: bool,

    /// Periods, comma separated. Defaults to day,week,mon for stocks and day otherwise.
    #[arg(long)]
    periods: Option<String>,

    /// Price adjustment: none, qfq or hfq. Bonds and REITs are always none.
    #[arg(long, default_value = "qfq")]
    adjust: Adjustment,
}

/// Overrides for the `[update]` config section.
#[derive(Args, Debug, Clone, Default)]
struct PacingArgs {
    /// Tasks in flight at once.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Seconds to wait after each completed task.
    #[arg(long)]
    delay: Option<f64>,

    /// Total fetch attempts per task.
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Seconds between attempts.
    #[arg(long)]
    retry_delay: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Download a fixed date range and overwrite each series.
    Download {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        pacing: PacingArgs,

        /// Start date (YYYY-MM-DD). Defaults to the earliest history for the class.
        #[arg(long)]
        start: Option<NaiveDate>,

        /// End date (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Re-download series that already exist.
        #[arg(long, default_value_t = false)]
        force: bool,
    },
    /// Incrementally update series from their latest stored bar.
    Update {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        pacing: PacingArgs,

        /// Delete and refetch the full history instead.
        #[arg(long, default_value_t = false)]
        force_full: bool,
    },
    /// Refetch series whose recent window is missing bars.
    Repair {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        pacing: PacingArgs,

        /// Size of the window compared against the provider, in days.
        #[arg(
            long,
            default_value_t = 30,
            value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_WINDOW_DAYS))
        )]
        check_days: u32,
    },
    /// Run the update job every day at a fixed local time until interrupted.
    Schedule {
        #[command(flatten)]
        select: SelectArgs,
        #[command(flatten)]
        pacing: PacingArgs,

        /// Local time of day, HH:MM.
        #[arg(long, default_value = "15:30")]
        at: String,
    },
    /// Report store size, code count, periods and last update.
    Status,
    /// Delete log files older than the given number of days.
    CleanLogs {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Print a stored series.
    Show {
        /// Code as stored (e.g. sh.600000, 019547).
        #[arg(long)]
        code: String,

        #[arg(long, default_value = "day")]
        period: Period,

        #[arg(long, default_value = "qfq")]
        adjust: Adjustment,

        /// First date to print (YYYY-MM-DD).
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last date to print (YYYY-MM-DD).
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Only the last N bars.
        #[arg(long)]
        tail: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = StoreConfig::load(cli.config.as_deref())?;
    init_logging(&cli.log_level, &config.offline_data.log_path)?;

    let app = App { config, json: cli.json };
    match cli.command {
        Commands::Download {
            select,
            pacing,
            start,
            end,
            force,
        } => {
            let today = Local::now().date_naive();
            let start = start.unwrap_or_else(|| select.asset.earliest_history());
            let end = end.unwrap_or(today);
            if start > end {
                bail!("--start {start} is after --end {end}");
            }
            app.run_batch("download", &select, &pacing, BatchMode::Download { start, end, force })
        }
        Commands::Update {
            select,
            pacing,
            force_full,
        } => app.run_batch("update", &select, &pacing, BatchMode::Update { force_full }),
        Commands::Repair {
            select,
            pacing,
            check_days,
        } => app.run_repair(&select, &pacing, check_days),
        Commands::Schedule { select, pacing, at } => app.run_schedule(&select, &pacing, &at),
        Commands::Status => app.run_status(),
        Commands::CleanLogs { days } => app.run_clean_logs(days),
        Commands::Show {
            code,
            period,
            adjust,
            start,
            end,
            tail,
        } => app.run_show(&code, period, adjust, start, end, tail),
    }
}

/// Console plus daily log file, filtered by RUST_LOG or `--log-level`.
fn init_logging(level: &str, log_dir: &Path) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level).with_context(|| format!("invalid --log-level '{level}'"))?,
    };

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let log_path = log_dir.join(log_file_name(Local::now().date_naive()));
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();
    Ok(())
}

struct App {
    config: StoreConfig,
    json: bool,
}

impl App {
    fn options(&self, pacing: &PacingArgs) -> Result<BatchOptions> {
        let mut options = self.config.batch_options();
        if let Some(n) = pacing.max_workers {
            if n == 0 {
                bail!("--max-workers must be at least 1");
            }
            options.max_workers = n;
        }
        if let Some(secs) = pacing.delay {
            options.delay = seconds("--delay", secs)?;
        }
        if let Some(n) = pacing.max_attempts {
            options.max_attempts = n.max(1);
        }
        if let Some(secs) = pacing.retry_delay {
            options.retry_delay = seconds("--retry-delay", secs)?;
        }
        Ok(options)
    }

    fn provider(&self) -> Result<EastMoneyProvider> {
        Ok(EastMoneyProvider::new(self.config.eastmoney())?)
    }

    fn run_batch(
        &self,
        operation: &str,
        select: &SelectArgs,
        pacing: &PacingArgs,
        mode: BatchMode,
    ) -> Result<()> {
        let store = self.config.store();
        let request = batch_request(&store, select)?;
        let provider = self.provider()?;
        let progress = LogProgress;

        let stats = Orchestrator::new(&store, &provider, self.options(pacing)?)
            .with_policies(self.config.policies())
            .with_progress(&progress)
            .run(&request, mode)?;
        self.report(operation, &stats)
    }

    fn run_repair(&self, select: &SelectArgs, pacing: &PacingArgs, check_days: u32) -> Result<()> {
        let store = self.config.store();
        let request = batch_request(&store, select)?;
        let provider = self.provider()?;
        let progress = LogProgress;

        let stats = Orchestrator::new(&store, &provider, self.options(pacing)?)
            .with_policies(self.config.policies())
            .with_progress(&progress)
            .repair(&request, check_days)?;
        self.report("repair", &stats)
    }

    fn run_schedule(&self, select: &SelectArgs, pacing: &PacingArgs, at: &str) -> Result<()> {
        let at = parse_daily_time(at)?;
        let options = self.options(pacing)?;
        let provider = self.provider()?;
        let store = self.config.store();
        // Validate the selection once up front; codes are re-read on every run.
        batch_request(&store, select)?;

        run_daily(at, None, || {
            let request = match batch_request(&store, select) {
                Ok(request) => request,
                Err(e) => {
                    error!(error = %e, "scheduled update skipped");
                    return;
                }
            };
            let progress = LogProgress;
            match Orchestrator::new(&store, &provider, options)
                .with_policies(self.config.policies())
                .with_progress(&progress)
                .run(&request, BatchMode::Update { force_full: false })
            {
                Ok(stats) => stats.log_summary("scheduled update"),
                Err(e) => error!(error = %e, "scheduled update failed"),
            }
            if let Err(e) = clean_old_logs(&self.config.offline_data.log_path, 30, SystemTime::now()) {
                error!(error = %e, "log cleanup failed");
            }
        });
        Ok(())
    }

    fn run_status(&self) -> Result<()> {
        let store = self.config.store();
        let stats = store.statistics();
        if self.json {
            println!("{}", serde_json::to_string_pretty(&stats)?);
            return Ok(());
        }

        println!("Store:        {}", store.root().display());
        println!("Mirror:       {}", if store.mirror_enabled() { "on" } else { "off" });
        println!("Files:        {}", stats.total_files);
        println!("Total size:   {:.2} MB", stats.total_size_mb);
        println!("Codes:        {}", stats.code_count);
        println!(
            "Periods:      {}",
            if stats.periods.is_empty() {
                "(none)".to_string()
            } else {
                stats.periods.join(", ")
            }
        );
        match stats.last_update {
            Some(t) => println!("Last update:  {}", t.format("%Y-%m-%d %H:%M:%S")),
            None => println!("Last update:  (never)"),
        }
        Ok(())
    }

    fn run_clean_logs(&self, days: u32) -> Result<()> {
        let dir = &self.config.offline_data.log_path;
        let removed = clean_old_logs(dir, days, SystemTime::now())
            .with_context(|| format!("failed to clean logs in {}", dir.display()))?;
        if self.json {
            println!("{}", serde_json::json!({ "removed": removed, "days": days }));
        } else {
            println!("Removed {removed} log file(s) older than {days} days from {}", dir.display());
        }
        Ok(())
    }

    fn run_show(
        &self,
        code: &str,
        period: Period,
        adjust: Adjustment,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
        tail: Option<usize>,
    ) -> Result<()> {
        let store = self.config.store();
        let class = InstrumentClass::classify(code).unwrap_or(InstrumentClass::Stock);
        let key = SeriesKey::for_class(class, code, period, adjust);
        let mut bars = store.read_range(&key, start, end);
        if let Some(n) = tail {
            let skip = bars.len().saturating_sub(n);
            bars.drain(..skip);
        }

        if self.json {
            println!("{}", serde_json::to_string_pretty(&bars)?);
            return Ok(());
        }
        if bars.is_empty() {
            println!("No data for {key} at {}", store.series_path(&key).display());
            return Ok(());
        }

        println!(
            "{:<17} {:>10} {:>10} {:>10} {:>10} {:>14} {:>16} {:>8}",
            "time", "open", "high", "low", "close", "volume", "turnover", "turnrate"
        );
        for bar in &bars {
            println!(
                "{:<17} {:>10.3} {:>10.3} {:>10.3} {:>10.3} {:>14.0} {:>16.2} {:>8.3}",
                format_timestamp(&bar.time, None),
                bar.open,
                bar.high,
                bar.low,
                bar.close,
                bar.volume,
                bar.turnover,
                bar.turnrate
            );
        }
        println!("{} bar(s)", bars.len());
        Ok(())
    }

    fn report(&self, operation: &str, stats: &UpdateStats) -> Result<()> {
        stats.log_summary(operation);
        if self.json {
            println!("{}", serde_json::to_string_pretty(stats)?);
        }
        if stats.failed_count > 0 {
            std::process::exit(1);
        }
        Ok(())
    }
}

/// Build the batch from `--codes`, `--codes-file` and `--all`.
fn batch_request(store: &SeriesStore, select: &SelectArgs) -> Result<BatchRequest> {
    let class = select.asset;
    let adjustment = if class.supports_adjustment(select.adjust) {
        select.adjust
    } else {
        Adjustment::None
    };

    let mut codes = Vec::new();
    if let Some(arg) = &select.codes {
        codes.extend(split_code_arg(arg));
    }
    if let Some(path) = &select.codes_file {
        let listed = read_code_file(path)
            .with_context(|| format!("failed to read code file {}", path.display()))?;
        codes.extend(listed);
    }
    if select.all {
        let stored = store.list_codes(adjustment, Some(class));
        info!(class = %class, count = stored.len(), "selected every stored code");
        codes.extend(stored);
    }
    if select.codes.is_none() && select.codes_file.is_none() && !select.all {
        bail!("one of --codes, --codes-file or --all is required");
    }

    let periods = match &select.periods {
        Some(list) => Period::parse_list(list)?,
        None => default_periods(class),
    };
    if periods.is_empty() {
        bail!("--periods must name at least one period");
    }

    Ok(BatchRequest {
        class,
        codes,
        periods,
        adjustment: select.adjust,
    })
}

fn default_periods(class: InstrumentClass) -> Vec<Period> {
    match class {
        InstrumentClass::Stock => vec![Period::Day, Period::Week, Period::Month],
        InstrumentClass::Bond | InstrumentClass::Reit => vec![Period::Day],
    }
}

fn seconds(flag: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).with_context(|| format!("{flag} must be a non-negative number of seconds"))
}
