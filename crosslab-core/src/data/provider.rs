//! Candle provider trait and structured error types.
//!
//! `CandleProvider` abstracts over candle sources (exchange REST, CSV files,
//! synthetic generation) so they can be swapped and mocked in tests. The
//! Parquet cache wraps any provider; providers themselves know nothing about it.

use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Structured error types for data operations.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("hard stop: data provider has blocked requests (circuit breaker tripped)")]
    CircuitBreakerTripped,

    #[error("invalid time range: start {start} is not before end {end}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("cache error: {0}")]
    CacheError(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("parquet I/O error: {0}")]
    ParquetError(String),

    #[error("csv error: {0}")]
    CsvError(String),

    #[error("no cached data for {symbol} {timeframe}: run `download {symbol}` first")]
    NoCachedData { symbol: String, timeframe: Timeframe },

    #[error("data error: {0}")]
    Other(String),
}

impl DataError {
    /// Whether a later attempt may succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DataError::NetworkUnreachable(_) | DataError::RateLimited { .. }
        )
    }
}

/// Supplies ordered candles for a symbol, timeframe, and time range.
///
/// The range is half-open: `start <= timestamp < end`. Implementations return
/// candles ascending by timestamp; the ingest step enforces the rest.
pub trait CandleProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError>;

    /// Check if the provider is currently available (not rate-limited, not blocked).
    fn is_available(&self) -> bool;
}

impl<P: CandleProvider + ?Sized> CandleProvider for &P {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        (**self).fetch_candles(symbol, timeframe, start, end)
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Reject empty or inverted ranges before any I/O.
pub fn check_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), DataError> {
    if start >= end {
        return Err(DataError::InvalidRange { start, end });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn inverted_range_is_rejected() {
        let a = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(check_range(b, a).is_ok());
        assert!(matches!(
            check_range(a, b),
            Err(DataError::InvalidRange { .. })
        ));
        assert!(check_range(a, a).is_err());
    }

    #[test]
    fn transient_classification() {
        assert!(DataError::RateLimited { retry_after_secs: 1 }.is_transient());
        assert!(!DataError::CircuitBreakerTripped.is_transient());
        assert!(!DataError::SymbolNotFound { symbol: "X".into() }.is_transient());
    }
}
