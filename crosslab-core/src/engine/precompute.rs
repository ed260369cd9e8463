//! Indicator precomputation.
//!
//! The strategy's three series are computed once over the whole candle range
//! before the loop starts; the simulator only ever looks values up.

use crate::domain::Candle;
use crate::indicators::{Ema, Indicator, IndicatorSeries, Rsi};
use serde::{Deserialize, Serialize};

/// Indicator periods used by the EMA-cross / RSI strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorPeriods {
    pub rsi: usize,
    pub ema_short: usize,
    pub ema_long: usize,
}

impl Default for IndicatorPeriods {
    fn default() -> Self {
        Self {
            rsi: 14,
            ema_short: 9,
            ema_long: 21,
        }
    }
}

/// RSI plus the short and long EMA, each aligned to the same candle series.
#[derive(Debug, Clone, PartialEq)]
pub struct StrategyIndicators {
    pub rsi: IndicatorSeries,
    pub ema_short: IndicatorSeries,
    pub ema_long: IndicatorSeries,
}

impl StrategyIndicators {
    /// Compute all three series over the closes of `candles`.
    pub fn compute(candles: &[Candle], periods: &IndicatorPeriods) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        Self {
            rsi: Rsi::new(periods.rsi).compute(&closes),
            ema_short: Ema::new(periods.ema_short).compute(&closes),
            ema_long: Ema::new(periods.ema_long).compute(&closes),
        }
    }

    /// Assemble from already-computed series.
    pub fn from_series(
        rsi: IndicatorSeries,
        ema_short: IndicatorSeries,
        ema_long: IndicatorSeries,
    ) -> Self {
        Self {
            rsi,
            ema_short,
            ema_long,
        }
    }

    /// First candle index where a crossover can be evaluated.
    ///
    /// Needs both EMAs on the previous candle and RSI on the current one.
    pub fn first_tradable_bar(&self) -> usize {
        (self.ema_short.offset() + 1)
            .max(self.ema_long.offset() + 1)
            .max(self.rsi.offset())
    }

    /// Named series, for alignment checks and diagnostics.
    pub fn named(&self) -> [(&'static str, &IndicatorSeries); 3] {
        [
            ("rsi", &self.rsi),
            ("ema_short", &self.ema_short),
            ("ema_long", &self.ema_long),
        ]
    }
}
