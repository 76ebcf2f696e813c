//! Exchange-prefix resolution for bare stock codes.

use super::provider::{DataError, DataProvider, FetchRequest};
use crate::domain::{Adjustment, InstrumentClass, Period};
use crate::resolver::DateRange;
use chrono::NaiveDate;
use tracing::{info, warn};

/// Exchange prefixes in the order they are tried.
pub const EXCHANGE_PREFIXES: [&str; 2] = ["sh.", "sz."];

/// Days of daily bars a probe asks for.
const PROBE_WINDOW_DAYS: u32 = 30;

/// Answers whether a fully-qualified code is known to a source as of `today`.
pub trait CodeProbe {
    fn probe(&self, qualified_code: &str, today: NaiveDate) -> Result<bool, DataError>;
}

/// A provider knows a code when it returns any daily bar for the 30 days
/// ending at `today`.
impl<T: DataProvider + ?Sized> CodeProbe for T {
    fn probe(&self, qualified_code: &str, today: NaiveDate) -> Result<bool, DataError> {
        let request = FetchRequest {
            code: qualified_code.to_string(),
            class: InstrumentClass::Stock,
            period: Period::Day,
            adjustment: Adjustment::None,
            range: DateRange::trailing(today, PROBE_WINDOW_DAYS),
        };
        Ok(!self.fetch(&request)?.is_empty())
    }
}

pub fn has_exchange_prefix(code: &str) -> bool {
    EXCHANGE_PREFIXES.iter().any(|p| code.starts_with(p))
}

/// Qualify a stock code with its exchange prefix.
///
/// Codes that already carry `sh.`/`sz.` are returned unchanged. Otherwise
/// `sh.<code>` then `sz.<code>` is probed and the first hit wins. With no
/// hit, the input comes back unchanged.
pub fn resolve_exchange<P: CodeProbe + ?Sized>(probe: &P, code: &str, today: NaiveDate) -> String {
    let code = code.trim();
    if has_exchange_prefix(code) {
        return code.to_string();
    }

    for prefix in EXCHANGE_PREFIXES {
        let candidate = format!("{prefix}{code}");
        match probe.probe(&candidate, today) {
            Ok(true) => {
                info!(code, resolved = %candidate, "resolved exchange prefix");
                return candidate;
            }
            Ok(false) => {}
            Err(e) => {
                warn!(candidate = %candidate, error = %e, "exchange probe failed");
            }
        }
    }

    warn!(code, "no exchange matched; keeping code as given");
    code.to_string()
}

/// Bonds and REITs are stored under bare codes.
pub fn strip_exchange_prefix(code: &str) -> &str {
    let code = code.trim();
    EXCHANGE_PREFIXES
        .iter()
        .find_map(|p| code.strip_prefix(p))
        .unwrap_or(code)
}
