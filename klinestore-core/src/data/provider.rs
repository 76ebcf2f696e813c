//! Data provider trait and structured error types.
//!
//! The DataProvider trait abstracts over K-line sources so the orchestrator
//! can swap implementations and tests can use in-memory mocks.

use crate::domain::{Adjustment, Bar, InstrumentClass, Period};
use crate::resolver::DateRange;
use std::time::Duration;
use thiserror::Error;

/// One fetch: a code, its class, the period and adjustment, and the
/// inclusive date range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub code: String,
    pub class: InstrumentClass,
    pub period: Period,
    pub adjustment: Adjustment,
    pub range: DateRange,
}

/// Structured error types for provider operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("authentication required: {0}")]
    AuthenticationRequired(String),

    #[error("provider session failed: {0}")]
    SessionFailed(String),

    #[error("unsupported request: {0}")]
    Unsupported(String),

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether another attempt at the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::NetworkUnreachable(_)
            | DataError::RateLimited { .. }
            | DataError::ResponseFormatChanged(_)
            | DataError::Other(_) => true,
            DataError::Http { status, .. } => *status >= 500 || *status == 408,
            DataError::AuthenticationRequired(_)
            | DataError::SessionFailed(_)
            | DataError::Unsupported(_)
            | DataError::CircuitBreakerTripped => false,
        }
    }
}

/// Trait for K-line data sources.
///
/// Providers know nothing about the local store. `fetch` returns the bars
/// the source has for the request, possibly none.
pub trait DataProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Open a session. Called once at the start of each batch.
    fn connect(&self) -> Result<(), DataError> {
        Ok(())
    }

    /// Close the session opened by [`connect`](Self::connect).
    fn disconnect(&self) {}

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Bar>, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool {
        true
    }

    /// Time until an unavailable provider accepts requests again, if known.
    fn cooldown_remaining(&self) -> Option<Duration> {
        None
    }
}

impl<P: DataProvider + ?Sized> DataProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn connect(&self) -> Result<(), DataError> {
        (**self).connect()
    }

    fn disconnect(&self) {
        (**self).disconnect()
    }

    fn fetch(&self, request: &FetchRequest) -> Result<Vec<Bar>, DataError> {
        (**self).fetch(request)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn cooldown_remaining(&self) -> Option<Duration> {
        (**self).cooldown_remaining()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_classification() {
        assert!(DataError::NetworkUnreachable("timeout".into()).is_retryable());
        assert!(DataError::RateLimited {
            retry_after_secs: 5
        }
        .is_retryable());
        assert!(DataError::Http {
            status: 502,
            message: "bad gateway".into()
        }
        .is_retryable());
        assert!(!DataError::Http {
            status: 404,
            message: "not found".into()
        }
        .is_retryable());
        assert!(!DataError::CircuitBreakerTripped.is_retryable());
        assert!(!DataError::SessionFailed("login".into()).is_retryable());
    }
}
