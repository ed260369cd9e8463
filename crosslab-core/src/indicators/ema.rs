//! Exponential Moving Average (EMA).
//!
//! Recursive: EMA[t] = alpha * close[t] + (1 - alpha) * EMA[t-1], alpha = 2 / (period + 1).
//! Seed: SMA of the first `period` closes, placed at candle `period - 1`.
//! Lookback: period - 1.

use super::{Indicator, IndicatorSeries};

#[derive(Debug, Clone)]
pub struct Ema {
    period: usize,
    name: String,
}

impl Ema {
    /// `period` of zero is treated as one.
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            name: format!("ema_{period}"),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl Indicator for Ema {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookback(&self) -> usize {
        self.period - 1
    }

    fn compute(&self, closes: &[f64]) -> IndicatorSeries {
        IndicatorSeries::new(ema_values(closes, self.period), self.lookback())
    }
}

/// EMA values past warm-up: `closes.len() - period + 1` values, empty if too short.
pub fn ema_values(closes: &[f64], period: usize) -> Vec<f64> {
    let n = closes.len();
    if period == 0 || n < period {
        return Vec::new();
    }

    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(n - period + 1);

    let seed = closes[..period].iter().sum::<f64>() / period as f64;
    out.push(seed);

    let mut prev = seed;
    for &close in &closes[period..] {
        let ema = alpha * close + (1.0 - alpha) * prev;
        out.push(ema);
        prev = ema;
    }

    out
}
