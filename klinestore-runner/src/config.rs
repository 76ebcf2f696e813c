//! TOML configuration.
//!
//! Every field has a default, so an absent file or a partial file is fine:
//!
//! ```toml
//! [offline_data]
//! path = "./offline_data"
//! log_path = "./logs"
//! mirror = false
//!
//! [update]
//! max_workers = 1
//! delay_ms = 200
//! max_attempts = 3
//! retry_delay_ms = 5000
//!
//! [update.days]
//! stock = 30
//! bond = 90
//! reit = 60
//!
//! [provider]
//! timeout_secs = 30
//! breaker_cooldown_secs = 1800
//! breaker_threshold = 5
//! ```

use klinestore_core::data::EastMoneyConfig;
use klinestore_core::{InstrumentClass, ResolverPolicy, SeriesStore, MAX_WINDOW_DAYS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::orchestrator::{BatchOptions, ClassPolicies};

/// Environment variable naming a config file when `--config` is not given.
pub const CONFIG_ENV: &str = "KLINESTORE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub offline_data: OfflineDataConfig,
    pub update: UpdateConfig,
    pub provider: ProviderConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineDataConfig {
    /// Store root.
    pub path: PathBuf,
    /// Directory for `offline_data_YYYYMMDD.log` files.
    pub log_path: PathBuf,
    /// Write a Parquet mirror next to each CSV.
    pub mirror: bool,
}

impl Default for OfflineDataConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./offline_data"),
            log_path: PathBuf::from("./logs"),
            mirror: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub max_workers: usize,
    /// Pause after each completed task.
    pub delay_ms: u64,
    /// Total attempts per task, first one included.
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Lookback windows for series with no local data.
    pub days: LookbackDays,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            max_workers: 1,
            delay_ms: 200,
            max_attempts: 3,
            retry_delay_ms: 5000,
            days: LookbackDays::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookbackDays {
    pub stock: u32,
    pub bond: u32,
    pub reit: u32,
}

impl Default for LookbackDays {
    fn default() -> Self {
        Self {
            stock: 30,
            bond: 90,
            reit: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub breaker_cooldown_secs: u64,
    pub breaker_threshold: u32,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: klinestore_core::data::eastmoney::DEFAULT_BASE_URL.to_string(),
            timeout_secs: 30,
            breaker_cooldown_secs: 30 * 60,
            breaker_threshold: 5,
        }
    }
}

impl StoreConfig {
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: StoreConfig = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Load from `explicit`, else from `$KLINESTORE_CONFIG`, else defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match std::env::var_os(CONFIG_ENV) {
            Some(path) if !path.is_empty() => Self::from_file(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.update.max_workers == 0 {
            return Err(ConfigError::Invalid("update.max_workers must be at least 1".into()));
        }
        let days = self.update.days;
        for (class, n) in [("stock", days.stock), ("bond", days.bond), ("reit", days.reit)] {
            if n == 0 || n > MAX_WINDOW_DAYS {
                return Err(ConfigError::Invalid(format!(
                    "update.days.{class} must be between 1 and {MAX_WINDOW_DAYS}, got {n}"
                )));
            }
        }
        if self.offline_data.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("offline_data.path must not be empty".into()));
        }
        Ok(())
    }

    pub fn store(&self) -> SeriesStore {
        SeriesStore::new(&self.offline_data.path).with_mirror(self.offline_data.mirror)
    }

    /// Class defaults with the configured lookback.
    pub fn policy_for(&self, class: InstrumentClass) -> ResolverPolicy {
        let days = match class {
            InstrumentClass::Stock => self.update.days.stock,
            InstrumentClass::Bond => self.update.days.bond,
            InstrumentClass::Reit => self.update.days.reit,
        };
        ResolverPolicy::for_class(class).with_lookback(days)
    }

    pub fn policies(&self) -> ClassPolicies {
        ClassPolicies {
            stock: self.policy_for(InstrumentClass::Stock),
            bond: self.policy_for(InstrumentClass::Bond),
            reit: self.policy_for(InstrumentClass::Reit),
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_workers: self.update.max_workers,
            delay: Duration::from_millis(self.update.delay_ms),
            max_attempts: self.update.max_attempts.max(1),
            retry_delay: Duration::from_millis(self.update.retry_delay_ms),
        }
    }

    pub fn eastmoney(&self) -> EastMoneyConfig {
        EastMoneyConfig {
            base_url: self.provider.base_url.clone(),
            timeout: Duration::from_secs(self.provider.timeout_secs),
            breaker_cooldown: Duration::from_secs(self.provider.breaker_cooldown_secs),
            breaker_threshold: self.provider.breaker_threshold,
        }
    }
}
