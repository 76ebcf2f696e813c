//! EastMoney K-line provider.
//!
//! Fetches bars from the public `push2his` kline endpoint. One HTTP request
//! per attempt; retries are the orchestrator's job. HTTP 403 trips the shared
//! circuit breaker.

use super::circuit_breaker::CircuitBreaker;
use super::exchange::strip_exchange_prefix;
use super::ingest::{ingest_records, parse_number, RawRecord};
use super::provider::{DataError, DataProvider, FetchRequest};
use crate::domain::{Adjustment, Bar, InstrumentClass, Period};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://push2his.eastmoney.com/api/qt/stock/kline/get";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Market ids: 1 = Shanghai, 0 = Shenzhen.
const SHANGHAI: u8 = 1;
const SHENZHEN: u8 = 0;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(default)]
    rc: i64,
    data: Option<KlineData>,
}

#[derive(Debug, Deserialize)]
struct KlineData {
    #[serde(default)]
    klines: Vec<String>,
}

/// Connection settings for [`EastMoneyProvider`].
#[derive(Debug, Clone)]
pub struct EastMoneyConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub breaker_cooldown: Duration,
    pub breaker_threshold: u32,
}

impl Default for EastMoneyConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            breaker_cooldown: Duration::from_secs(30 * 60),
            breaker_threshold: 5,
        }
    }
}

pub struct EastMoneyProvider {
    client: reqwest::blocking::Client,
    base_url: String,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl EastMoneyProvider {
    pub fn new(config: EastMoneyConfig) -> Result<Self, DataError> {
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker_cooldown,
            config.breaker_threshold,
        ));
        Self::with_breaker(config, breaker)
    }

    /// Share a circuit breaker with other providers hitting the same host.
    pub fn with_breaker(
        config: EastMoneyConfig,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url,
            circuit_breaker,
        })
    }

    /// Candidate `secid`s for a code, in the order they are tried.
    fn secids(code: &str, class: InstrumentClass) -> Vec<String> {
        if let Some(bare) = code.strip_prefix("sh.") {
            return vec![format!("{SHANGHAI}.{bare}")];
        }
        if let Some(bare) = code.strip_prefix("sz.") {
            return vec![format!("{SHENZHEN}.{bare}")];
        }
        let bare = match class {
            InstrumentClass::Stock => code,
            InstrumentClass::Bond | InstrumentClass::Reit => strip_exchange_prefix(code),
        };
        vec![format!("{SHANGHAI}.{bare}"), format!("{SHENZHEN}.{bare}")]
    }

    fn klt(period: Period) -> u32 {
        match period {
            Period::Min5 => 5,
            Period::Min15 => 15,
            Period::Min30 => 30,
            Period::Min60 => 60,
            Period::Day => 101,
            Period::Week => 102,
            Period::Month => 103,
        }
    }

    fn fqt(adjustment: Adjustment) -> u32 {
        match adjustment {
            Adjustment::None => 0,
            Adjustment::Forward => 1,
            Adjustment::Backward => 2,
        }
    }

    fn kline_url(&self, secid: &str, request: &FetchRequest) -> String {
        format!(
            "{base}?secid={secid}&fields1=f1,f2,f3,f4,f5,f6\
             &fields2=f51,f52,f53,f54,f55,f56,f57,f58,f59,f60,f61\
             &klt={klt}&fqt={fqt}&beg={beg}&end={end}",
            base = self.base_url,
            klt = Self::klt(request.period),
            fqt = Self::fqt(request.adjustment),
            beg = request.range.start.format("%Y%m%d"),
            end = request.range.end.format("%Y%m%d"),
        )
    }

    /// Parse a kline response body into bars.
    fn parse_response(code: &str, resp: KlineResponse) -> Result<Vec<Bar>, DataError> {
        if resp.rc != 0 {
            return Err(DataError::Other(format!("provider returned rc={}", resp.rc)));
        }
        let Some(data) = resp.data else {
            return Ok(Vec::new());
        };

        let mut records = Vec::with_capacity(data.klines.len());
        for line in &data.klines {
            let fields: Vec<&str> = line.split(',').collect();
            if fields.len() < 6 {
                return Err(DataError::ResponseFormatChanged(format!(
                    "kline row has {} fields: '{line}'",
                    fields.len()
                )));
            }
            let field = |i: usize| fields.get(i).and_then(|f| parse_number(f));
            // date, open, close, high, low, volume, amount, amplitude, pct, chg, turnover rate
            records.push(RawRecord {
                time: fields[0].to_string(),
                open: field(1),
                close: field(2),
                high: field(3),
                low: field(4),
                volume: field(5),
                turnover: field(6),
                turnrate: field(10),
            });
        }
        Ok(ingest_records(code, records))
    }

    /// One request against one `secid`.
    fn request(&self, secid: &str, request: &FetchRequest) -> Result<Vec<Bar>, DataError> {
        if !self.circuit_breaker.is_allowed() {
            return Err(DataError::CircuitBreakerTripped);
        }

        let url = self.kline_url(secid, request);
        debug!(code = %request.code, secid, "GET kline");

        let resp = self.client.get(&url).send().map_err(|e| {
            if e.is_timeout() {
                DataError::NetworkUnreachable(format!("timeout: {e}"))
            } else {
                DataError::NetworkUnreachable(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::FORBIDDEN {
            // IP ban: stop hitting the host at all
            self.circuit_breaker.trip();
            return Err(DataError::CircuitBreakerTripped);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.circuit_breaker.record_failure();
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(DataError::RateLimited {
                retry_after_secs: retry_after,
            });
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(DataError::AuthenticationRequired(
                "kline endpoint refused the request".into(),
            ));
        }
        if !status.is_success() {
            if status.is_server_error() {
                self.circuit_breaker.record_failure();
            }
            return Err(DataError::Http {
                status: status.as_u16(),
                message: format!("kline request for {} failed", request.code),
            });
        }

        let body: KlineResponse = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!(
                "failed to parse response for {}: {e}",
                request.code
            ))
        })?;
        let bars = Self::parse_response(&request.code, body)?;
        self.circuit_breaker.record_success();
        Ok(bars)
    }
}

impl DataProvider for EastMoneyProvider {
    fn name(&self) -> &str {
        "eastmoney"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Bar>, DataError> {
        if !request.class.supports_period(request.period) {
            return Err(DataError::Unsupported(format!(
                "{} has no {} bars",
                request.class, request.period
            )));
        }

        // Bare codes: first market with data wins.
        let mut bars = Vec::new();
        for secid in Self::secids(&request.code, request.class) {
            bars = self.request(&secid, request)?;
            if !bars.is_empty() {
                break;
            }
        }
        Ok(bars)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        Some(self.circuit_breaker.remaining_cooldown())
    }
}
