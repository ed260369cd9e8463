//! Market screening: score symbols by liquidity, volatility, spread, and trend.
//!
//! Independent of the simulator; only the EMA part of the indicator
//! pipeline is used.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crosslab_core::data::CandleProvider;
use crosslab_core::domain::{Candle, Timeframe};
use crosslab_core::indicators::{Ema, Indicator};

use crate::config::ParamError;
use crate::metrics::{mean_f64, std_dev};
use crate::runner::{fetch_series, BacktestError};

/// Which symbols to screen and over what history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreeningParams {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub lookback_days: i64,
    pub now: DateTime<Utc>,
    pub ema_short_period: usize,
    pub ema_long_period: usize,
}

impl ScreeningParams {
    pub fn new(symbols: Vec<String>, timeframe: Timeframe, lookback_days: i64, now: DateTime<Utc>) -> Self {
        Self {
            symbols,
            timeframe,
            lookback_days,
            now,
            ema_short_period: 9,
            ema_long_period: 21,
        }
    }

    pub fn validate(&self) -> Result<(), ParamError> {
        if self.lookback_days <= 0 {
            return Err(ParamError::new(
                "lookback_days",
                self.lookback_days,
                "must be greater than zero",
            ));
        }
        if self.ema_short_period == 0 || self.ema_short_period >= self.ema_long_period {
            return Err(ParamError::new(
                "ema_short_period",
                self.ema_short_period,
                &format!("must be in 1..{}", self.ema_long_period),
            ));
        }
        Ok(())
    }
}

/// Screening scores for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairMetrics {
    pub symbol: String,
    /// Mean quote volume per bar.
    pub volume: f64,
    /// Sample std-dev of close-to-close returns, percent.
    pub volatility: f64,
    pub liquidity: f64,
    /// Half the mean high-low range, percent of close.
    pub spread_estimate: f64,
    /// EMA separation at the last bar, percent of the long EMA.
    pub trend_strength: f64,
    pub score: f64,
    pub candles: usize,
}

/// `liquidity × 10 + trend × 2 + min(volatility, 5) × 3 − spread × 4`.
pub fn pair_score(liquidity: f64, trend_strength: f64, volatility: f64, spread_estimate: f64) -> f64 {
    liquidity * 10.0 + trend_strength * 2.0 + volatility.min(5.0) * 3.0 - spread_estimate * 4.0
}

/// Compute the screening metrics of one candle series.
pub fn compute_pair_metrics(
    symbol: &str,
    timeframe: Timeframe,
    candles: &[Candle],
    ema_short_period: usize,
    ema_long_period: usize,
) -> Result<PairMetrics, BacktestError> {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let short = Ema::new(ema_short_period).compute(&closes).last();
    let long = Ema::new(ema_long_period).compute(&closes).last();
    let (Some(short), Some(long)) = (short, long) else {
        return Err(BacktestError::InsufficientData {
            symbol: symbol.to_string(),
            timeframe,
            required: ema_long_period.max(ema_short_period),
            available: candles.len(),
        });
    };

    let volume = mean_f64(&candles.iter().map(Candle::quote_volume).collect::<Vec<_>>());

    let returns: Vec<f64> = closes
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let volatility = std_dev(&returns) * 100.0;

    let active = candles.iter().filter(|c| c.volume > 0.0).count();
    let liquidity = (1.0 + volume).log10() * active as f64 / candles.len() as f64;

    let spread_estimate = mean_f64(
        &candles
            .iter()
            .filter(|c| c.close > 0.0)
            .map(|c| (c.high - c.low) / c.close * 100.0)
            .collect::<Vec<_>>(),
    ) / 2.0;

    let trend_strength = if long.abs() > 0.0 {
        (short - long).abs() / long * 100.0
    } else {
        0.0
    };

    Ok(PairMetrics {
        symbol: symbol.to_string(),
        volume,
        volatility,
        liquidity,
        spread_estimate,
        trend_strength,
        score: pair_score(liquidity, trend_strength, volatility, spread_estimate),
        candles: candles.len(),
    })
}

/// Descending score; ties ordered by symbol.
pub fn rank_pairs(pairs: &mut [PairMetrics]) {
    pairs.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.symbol.cmp(&b.symbol))
    });
}

/// Fetch `lookback_days` for each symbol and rank them.
///
/// A symbol whose fetch or EMA warm-up fails is skipped with a warning.
pub fn analyze_pairs<P: CandleProvider + ?Sized>(
    provider: &P,
    params: &ScreeningParams,
) -> Result<Vec<PairMetrics>, BacktestError> {
    params.validate()?;
    let start = params.now - Duration::days(params.lookback_days);

    let mut pairs = Vec::with_capacity(params.symbols.len());
    for symbol in &params.symbols {
        let metrics = fetch_series(provider, symbol, params.timeframe, start, params.now).and_then(
            |candles| {
                compute_pair_metrics(
                    symbol,
                    params.timeframe,
                    &candles,
                    params.ema_short_period,
                    params.ema_long_period,
                )
            },
        );
        match metrics {
            Ok(m) => {
                tracing::debug!(symbol = %m.symbol, score = m.score, "pair screened");
                pairs.push(m);
            }
            Err(e) => tracing::warn!(symbol = %symbol, error = %e, "skipping pair"),
        }
    }

    rank_pairs(&mut pairs);
    tracing::info!(
        requested = params.symbols.len(),
        ranked = pairs.len(),
        "screening complete"
    );
    Ok(pairs)
}
