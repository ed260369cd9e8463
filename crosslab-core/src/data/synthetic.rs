//! Deterministic synthetic candles for offline runs and tests.
//!
//! A geometric random walk seeded from BLAKE3 of `symbol/timeframe/start`, so
//! the same request always yields the same series.

use super::provider::{check_range, CandleProvider, DataError};
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

pub struct SyntheticProvider {
    start_price: f64,
    /// Largest absolute per-candle return.
    max_step: f64,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self {
            start_price: 100.0,
            max_step: 0.02,
        }
    }

    pub fn with_start_price(mut self, price: f64) -> Self {
        self.start_price = price;
        self
    }

    pub fn with_max_step(mut self, step: f64) -> Self {
        self.max_step = step.abs();
        self
    }
}

impl Default for SyntheticProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleProvider for SyntheticProvider {
    fn name(&self) -> &str {
        "synthetic"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        check_range(start, end)?;
        Ok(generate_candles(
            symbol,
            timeframe,
            start,
            end,
            self.start_price,
            self.max_step,
        ))
    }

    fn is_available(&self) -> bool {
        true
    }
}

/// Generate candles on the timeframe grid in `[start, end)`.
pub fn generate_candles(
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    start_price: f64,
    max_step: f64,
) -> Vec<Candle> {
    let seed_input = format!("{symbol}/{timeframe}/{}", start.timestamp_millis());
    let seed: [u8; 32] = *blake3::hash(seed_input.as_bytes()).as_bytes();
    let mut rng = StdRng::from_seed(seed);

    let step = timeframe.duration();
    let mut candles = Vec::new();
    let mut price = start_price;
    let mut ts = start;

    while ts < end {
        let ret: f64 = if max_step > 0.0 {
            rng.gen_range(-max_step..max_step)
        } else {
            0.0
        };
        let open = price;
        let close = (price * (1.0 + ret)).max(f64::EPSILON);
        let wick = max_step.max(1e-6) / 2.0;
        let high = open.max(close) * (1.0 + rng.gen_range(0.0..wick));
        let low = open.min(close) * (1.0 - rng.gen_range(0.0..wick));
        let volume = rng.gen_range(10.0..1_000.0);

        candles.push(Candle {
            timestamp: ts,
            open,
            high,
            low,
            close,
            volume,
        });

        price = close;
        ts += step;
    }

    candles
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn range() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
        )
    }

    #[test]
    fn deterministic_per_symbol() {
        let (start, end) = range();
        let p = SyntheticProvider::new();
        let a = p.fetch_candles("BTCUSDT", Timeframe::H1, start, end).unwrap();
        let b = p.fetch_candles("BTCUSDT", Timeframe::H1, start, end).unwrap();
        let c = p.fetch_candles("ETHUSDT", Timeframe::H1, start, end).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 48);
    }

    #[test]
    fn candles_are_sane_and_on_grid() {
        let (start, end) = range();
        let candles = generate_candles("X", Timeframe::M15, start, end, 50.0, 0.05);
        assert_eq!(candles.len(), 192);
        assert!(candles.iter().all(Candle::is_sane));
        assert!(candles
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == Timeframe::M15.duration()));
    }

    #[test]
    fn zero_step_is_flat() {
        let (start, end) = range();
        let candles = generate_candles("X", Timeframe::H4, start, end, 10.0, 0.0);
        assert!(candles.iter().all(|c| c.close == 10.0));
    }
}
