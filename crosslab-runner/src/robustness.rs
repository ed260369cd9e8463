//! Robustness validation: the same strategy replayed over trailing
//! one-month windows.
//!
//! Every window starts from the same balance; nothing carries over between
//! windows. Candles for the full span are fetched once and sliced per
//! window. Windows that fail are reported and left out of the aggregates.

use std::sync::atomic::AtomicBool;

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};

use crosslab_core::data::CandleProvider;
use crosslab_core::domain::{Candle, Timeframe};
use crosslab_core::engine::state::month_key;

use crate::config::{BacktestParams, ParamError, StrategyParams};
use crate::metrics::{mean_f64, std_dev};
use crate::optimizer::{map_tasks, SweepOptions};
use crate::runner::{fetch_series, run_backtest_on_candles, BacktestError};

// ─── Configuration ───────────────────────────────────────────────────

/// Parameters for a robustness pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Number of trailing one-month windows.
    pub months: u32,
    /// End of the most recent window (exclusive).
    pub now: DateTime<Utc>,
    /// Balance every window starts from.
    pub initial_balance: f64,
    pub strategy: StrategyParams,
}

impl RobustnessParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.months == 0 {
            return Err(ParamError::new("months", 0, "must be at least 1"));
        }
        if !(self.initial_balance > 0.0 && self.initial_balance.is_finite()) {
            return Err(ParamError::new(
                "initial_balance",
                self.initial_balance,
                "must be greater than zero",
            ));
        }
        self.strategy.validate()
    }
}

// ─── Result types ────────────────────────────────────────────────────

/// Time span of one window: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSpec {
    pub index: usize,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Per-window statistics of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub profit_percent: f64,
    pub total_trades: usize,
    pub win_rate: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
}

/// Outcome of one window. Exactly one of `stats` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowOutcome {
    pub index: usize,
    /// `YYYY-MM` of the window start.
    pub month: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub candles: usize,
    pub stats: Option<WindowStats>,
    pub error: Option<String>,
}

/// Cross-window aggregates. Only successful windows contribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessReport {
    pub windows: Vec<WindowOutcome>,
    pub mean_profit_percent: f64,
    pub std_dev_profit_percent: f64,
    pub mean_win_rate: f64,
    pub mean_drawdown_percent: f64,
    pub mean_sharpe: f64,
    pub profitable_months: usize,
    pub profitable_months_percent: f64,
    pub evaluated_months: usize,
    pub failed_months: usize,
    pub robustness_factor: f64,
}

// ─── Window creation ─────────────────────────────────────────────────

/// Trailing windows `[now − k months, now − (k−1) months)` for `k = months..1`,
/// oldest first.
pub fn create_windows(now: DateTime<Utc>, months: u32) -> Result<Vec<WindowSpec>, ParamError> {
    (1..=months)
        .rev()
        .enumerate()
        .map(|(index, k)| {
            let start = now.checked_sub_months(Months::new(k));
            let end = now.checked_sub_months(Months::new(k - 1));
            match (start, end) {
                (Some(start), Some(end)) => Ok(WindowSpec { index, start, end }),
                _ => Err(ParamError::new("months", months, "reaches outside the calendar")),
            }
        })
        .collect()
}

/// Candles with `start <= timestamp < end`, assuming ascending order.
fn slice_window<'a>(candles: &'a [Candle], window: &WindowSpec) -> &'a [Candle] {
    let lo = candles.partition_point(|c| c.timestamp < window.start);
    let hi = candles.partition_point(|c| c.timestamp < window.end);
    &candles[lo..hi.max(lo)]
}

// ─── Aggregation ─────────────────────────────────────────────────────

/// `sign(mean) × (mean / max(std, 1)) × (profitable% / 100)`.
pub fn robustness_factor(mean_profit: f64, std_dev_profit: f64, profitable_pct: f64) -> f64 {
    let sign = if mean_profit > 0.0 {
        1.0
    } else if mean_profit < 0.0 {
        -1.0
    } else {
        0.0
    };
    sign * (mean_profit / std_dev_profit.max(1.0)) * (profitable_pct / 100.0)
}

/// Reduce window outcomes into a report.
pub fn aggregate(windows: Vec<WindowOutcome>) -> RobustnessReport {
    let stats: Vec<WindowStats> = windows.iter().filter_map(|w| w.stats).collect();
    let profits: Vec<f64> = stats.iter().map(|s| s.profit_percent).collect();

    let evaluated = stats.len();
    let profitable = profits.iter().filter(|&&p| p > 0.0).count();
    let profitable_pct = if evaluated > 0 {
        profitable as f64 / evaluated as f64 * 100.0
    } else {
        0.0
    };
    let mean_profit = mean_f64(&profits);
    let std_profit = std_dev(&profits);

    RobustnessReport {
        mean_profit_percent: mean_profit,
        std_dev_profit_percent: std_profit,
        mean_win_rate: mean_f64(&stats.iter().map(|s| s.win_rate).collect::<Vec<_>>()),
        mean_drawdown_percent: mean_f64(
            &stats
                .iter()
                .map(|s| s.max_drawdown_percent)
                .collect::<Vec<_>>(),
        ),
        mean_sharpe: mean_f64(&stats.iter().map(|s| s.sharpe_ratio).collect::<Vec<_>>()),
        profitable_months: profitable,
        profitable_months_percent: profitable_pct,
        evaluated_months: evaluated,
        failed_months: windows.len() - evaluated,
        robustness_factor: robustness_factor(mean_profit, std_profit, profitable_pct),
        windows,
    }
}

// ─── Entry points ────────────────────────────────────────────────────

/// Fetch the full span once and evaluate every window.
pub fn validate_robustness<P: CandleProvider + ?Sized>(
    provider: &P,
    params: &RobustnessParams,
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
) -> Result<RobustnessReport, BacktestError> {
    params.validate()?;
    let windows = create_windows(params.now, params.months)?;
    let (Some(first), Some(last)) = (windows.first(), windows.last()) else {
        return Err(ParamError::new("months", params.months, "must be at least 1").into());
    };
    let candles = fetch_series(provider, &params.symbol, params.timeframe, first.start, last.end)?;
    validate_on_candles(&candles, params, options, cancel)
}

/// Evaluate every window over an already-fetched series covering the span.
pub fn validate_on_candles(
    candles: &[Candle],
    params: &RobustnessParams,
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
) -> Result<RobustnessReport, BacktestError> {
    params.validate()?;
    let windows = create_windows(params.now, params.months)?;

    tracing::info!(
        symbol = %params.symbol,
        timeframe = %params.timeframe,
        months = params.months,
        candles = candles.len(),
        "starting robustness validation"
    );

    let outcomes = map_tasks(&windows, options, cancel, |_, window| {
        let slice = slice_window(candles, window);
        let run = BacktestParams {
            symbol: params.symbol.clone(),
            timeframe: params.timeframe,
            start: window.start,
            end: window.end,
            initial_balance: params.initial_balance,
            strategy: params.strategy,
        };
        let (stats, error) = match run_backtest_on_candles(slice, &run) {
            Ok(result) => {
                let m = &result.metrics;
                let stats = WindowStats {
                    profit_percent: m.profit_percent,
                    total_trades: m.total_trades,
                    win_rate: m.win_rate,
                    max_drawdown_percent: m.max_drawdown_percent,
                    sharpe_ratio: m.sharpe_ratio,
                };
                (Some(stats), None)
            }
            Err(e) => {
                tracing::warn!(window = window.index, start = %window.start, error = %e, "window failed");
                (None, Some(e.to_string()))
            }
        };
        WindowOutcome {
            index: window.index,
            month: month_key(window.start),
            start: window.start,
            end: window.end,
            candles: slice.len(),
            stats,
            error,
        }
    })?;

    if outcomes.iter().all(|w| w.stats.is_none()) {
        return Err(BacktestError::InsufficientData {
            symbol: params.symbol.clone(),
            timeframe: params.timeframe,
            required: params.strategy.required_candles(),
            available: outcomes.iter().map(|w| w.candles).max().unwrap_or(0),
        });
    }

    let report = aggregate(outcomes);
    tracing::info!(
        symbol = %params.symbol,
        evaluated = report.evaluated_months,
        failed = report.failed_months,
        profitable_pct = report.profitable_months_percent,
        factor = report.robustness_factor,
        "robustness validation complete"
    );
    Ok(report)
}
