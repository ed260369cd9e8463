//! Indicator pipeline.
//!
//! Each indicator is a pure function over the closing-price sequence that
//! returns only the values past its warm-up, wrapped in an `IndicatorSeries`
//! that remembers how many leading candles have no value. All lookups by
//! candle index go through `IndicatorSeries::at`, which is the only place the
//! offset arithmetic lives.

pub mod ema;
pub mod rsi;
pub mod series;

pub use ema::{ema_values, Ema};
pub use rsi::{rsi_values, Rsi};
pub use series::IndicatorSeries;

/// A single-series indicator over closing prices.
pub trait Indicator: Send + Sync {
    /// Stable name used in logs and diagnostics, e.g. `ema_21`.
    fn name(&self) -> &str;

    /// Number of leading candles that have no value.
    fn lookback(&self) -> usize;

    /// Compute the series over the whole close sequence.
    fn compute(&self, closes: &[f64]) -> IndicatorSeries;
}

/// Create synthetic hourly candles from close prices for testing.
///
/// open = prev_close (or close for the first candle),
/// high = max(open,close) + 1.0, low = min(open,close) - 1.0, volume = 1000.
#[cfg(test)]
pub fn make_candles(closes: &[f64]) -> Vec<crate::domain::Candle> {
    use crate::domain::Candle;
    use chrono::TimeZone;
    let base = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                timestamp: base + chrono::Duration::hours(i as i64),
                open,
                high: open.max(close) + 1.0,
                low: open.min(close) - 1.0,
                close,
                volume: 1000.0,
            }
        })
        .collect()
}

/// Assert two f64 values are approximately equal (within epsilon).
#[cfg(test)]
pub fn assert_approx(actual: f64, expected: f64, epsilon: f64) {
    assert!(
        (actual - expected).abs() < epsilon,
        "assert_approx failed: actual={actual}, expected={expected}, diff={}, epsilon={epsilon}",
        (actual - expected).abs()
    );
}

/// Default epsilon for indicator tests.
#[cfg(test)]
pub const DEFAULT_EPSILON: f64 = 1e-10;
