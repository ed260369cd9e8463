//! Exhaustive grid search over strategy parameters.
//!
//! Every grid point is an independent run on the same immutable candle
//! slice, so points are evaluated on a rayon pool and reduced afterwards.
//! A failing point is recorded and excluded; the sweep only fails when
//! every point fails.

use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crosslab_core::data::CandleProvider;
use crosslab_core::domain::Candle;

use crate::config::{BacktestParams, ParamError, StrategyParams};
use crate::metrics::PerformanceMetrics;
use crate::runner::{fetch_series, run_backtest_on_candles, BacktestError, BacktestResult};

// ─── Grid ───────────────────────────────────────────────────────────

/// Values to sweep. Optional lists default to the base parameter's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamGrid {
    #[serde(default = "default_position_sizes")]
    pub position_size_pct: Vec<f64>,

    #[serde(default = "default_stop_losses")]
    pub stop_loss_pct: Vec<f64>,

    #[serde(default = "default_take_profits")]
    pub take_profit_pct: Vec<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_period: Option<Vec<usize>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ema_short_period: Option<Vec<usize>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ema_long_period: Option<Vec<usize>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_oversold: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rsi_overbought: Option<Vec<f64>>,
}

fn default_position_sizes() -> Vec<f64> {
    vec![5.0, 10.0, 20.0]
}

fn default_stop_losses() -> Vec<f64> {
    vec![1.0, 2.0, 3.0]
}

fn default_take_profits() -> Vec<f64> {
    vec![2.0, 4.0, 6.0]
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            position_size_pct: default_position_sizes(),
            stop_loss_pct: default_stop_losses(),
            take_profit_pct: default_take_profits(),
            rsi_period: None,
            ema_short_period: None,
            ema_long_period: None,
            rsi_oversold: None,
            rsi_overbought: None,
        }
    }
}

impl ParamGrid {
    /// Grid over the three risk parameters only.
    pub fn risk_only(position_size_pct: Vec<f64>, stop_loss_pct: Vec<f64>, take_profit_pct: Vec<f64>) -> Self {
        Self {
            position_size_pct,
            stop_loss_pct,
            take_profit_pct,
            ..Self::default()
        }
    }

    /// Cartesian product size, before invalid combinations are skipped.
    pub fn size(&self) -> usize {
        self.position_size_pct.len()
            * self.stop_loss_pct.len()
            * self.take_profit_pct.len()
            * self.rsi_period.as_ref().map_or(1, Vec::len)
            * self.ema_short_period.as_ref().map_or(1, Vec::len)
            * self.ema_long_period.as_ref().map_or(1, Vec::len)
            * self.rsi_oversold.as_ref().map_or(1, Vec::len)
            * self.rsi_overbought.as_ref().map_or(1, Vec::len)
    }

    /// All combinations in grid order: position size outermost, then stop
    /// loss, take profit, RSI period, short EMA, long EMA, oversold, overbought.
    pub fn combinations(&self, base: &StrategyParams) -> Vec<StrategyParams> {
        let rsi_periods = values_or(&self.rsi_period, base.rsi_period);
        let shorts = values_or(&self.ema_short_period, base.ema_short_period);
        let longs = values_or(&self.ema_long_period, base.ema_long_period);
        let oversolds = values_or(&self.rsi_oversold, base.rsi_oversold);
        let overboughts = values_or(&self.rsi_overbought, base.rsi_overbought);

        let mut combos = Vec::new();
        for &position_size_pct in &self.position_size_pct {
            for &stop_loss_pct in &self.stop_loss_pct {
                for &take_profit_pct in &self.take_profit_pct {
                    for &rsi_period in &rsi_periods {
                        for &ema_short_period in &shorts {
                            for &ema_long_period in &longs {
                                // Skip invalid combinations (short >= long)
                                if ema_short_period >= ema_long_period {
                                    continue;
                                }
                                for &rsi_oversold in &oversolds {
                                    for &rsi_overbought in &overboughts {
                                        if rsi_oversold >= rsi_overbought {
                                            continue;
                                        }
                                        combos.push(StrategyParams {
                                            rsi_period,
                                            ema_short_period,
                                            ema_long_period,
                                            rsi_oversold,
                                            rsi_overbought,
                                            position_size_pct,
                                            stop_loss_pct,
                                            take_profit_pct,
                                        });
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
        combos
    }
}

fn values_or<T: Copy>(values: &Option<Vec<T>>, base: T) -> Vec<T> {
    values.clone().unwrap_or_else(|| vec![base])
}

// ─── Execution ──────────────────────────────────────────────────────

/// How a sweep is scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOptions {
    /// Evaluate tasks on rayon; `false` runs them in order on the caller's thread.
    pub parallel: bool,
    /// Dedicated pool size; `None` uses the global pool (one worker per core).
    pub max_threads: Option<usize>,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            parallel: true,
            max_threads: None,
        }
    }
}

impl SweepOptions {
    pub fn with_max_threads(mut self, max_threads: Option<usize>) -> Self {
        self.max_threads = max_threads;
        self
    }

    pub fn with_parallelism(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Map `f` over `items`, preserving order.
///
/// The cancel flag is checked before each task starts; a task that has
/// started always runs to completion. If any task was skipped the whole
/// sweep reports `Cancelled`.
pub(crate) fn map_tasks<T, R, F>(
    items: &[T],
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
    f: F,
) -> Result<Vec<R>, BacktestError>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let task = |(index, item): (usize, &T)| {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            None
        } else {
            Some(f(index, item))
        }
    };

    let results: Vec<Option<R>> = if !options.parallel {
        items.iter().enumerate().map(task).collect()
    } else if let Some(threads) = options.max_threads {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| BacktestError::ThreadPool(e.to_string()))?;
        pool.install(|| items.par_iter().enumerate().map(task).collect())
    } else {
        items.par_iter().enumerate().map(task).collect()
    };

    results
        .into_iter()
        .collect::<Option<Vec<R>>>()
        .ok_or(BacktestError::Cancelled)
}

// ─── Result types ───────────────────────────────────────────────────

/// Composite objective maximized by the optimizer.
pub fn composite_score(m: &PerformanceMetrics) -> f64 {
    2.0 * m.profit_percent - 3.0 * m.max_drawdown_percent + 10.0 * m.sharpe_ratio
        + 0.5 * m.win_rate
}

/// Outcome of one grid point. Exactly one of `metrics` or `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPointOutcome {
    /// Position in grid order.
    pub index: usize,
    pub params: StrategyParams,
    pub score: Option<f64>,
    pub metrics: Option<PerformanceMetrics>,
    pub error: Option<String>,
}

impl GridPointOutcome {
    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

/// The winning grid point with its full backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub index: usize,
    pub params: StrategyParams,
    pub score: f64,
    pub result: BacktestResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub best: GridPoint,
    pub all: Vec<GridPointOutcome>,
    pub evaluated: usize,
    pub failed: usize,
}

/// Evaluate every combination with `eval`, recording failures instead of
/// propagating them.
pub(crate) fn evaluate_grid<F>(
    combos: &[StrategyParams],
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
    eval: F,
) -> Result<Vec<GridPointOutcome>, BacktestError>
where
    F: Fn(&StrategyParams) -> Result<PerformanceMetrics, BacktestError> + Sync,
{
    map_tasks(combos, options, cancel, |index, params| match eval(params) {
        Ok(metrics) => GridPointOutcome {
            index,
            params: *params,
            score: Some(composite_score(&metrics)),
            metrics: Some(metrics),
            error: None,
        },
        Err(e) => {
            tracing::debug!(index, error = %e, "grid point failed");
            GridPointOutcome {
                index,
                params: *params,
                score: None,
                metrics: None,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Highest score wins; ties keep the earliest point in grid order.
pub fn select_best(outcomes: &[GridPointOutcome]) -> Option<&GridPointOutcome> {
    let mut best: Option<(&GridPointOutcome, f64)> = None;
    for outcome in outcomes {
        let Some(score) = outcome.score.filter(|s| !s.is_nan()) else {
            continue;
        };
        if best.map_or(true, |(_, best_score)| score > best_score) {
            best = Some((outcome, score));
        }
    }
    best.map(|(outcome, _)| outcome)
}

// ─── Entry points ───────────────────────────────────────────────────

/// Fetch the candles once, then sweep `grid` around `base`.
pub fn optimize_strategy<P: CandleProvider + ?Sized>(
    provider: &P,
    base: &BacktestParams,
    grid: &ParamGrid,
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
) -> Result<OptimizationResult, BacktestError> {
    base.validate()?;
    let candles = fetch_series(provider, &base.symbol, base.timeframe, base.start, base.end)?;
    optimize_on_candles(&candles, base, grid, options, cancel)
}

/// Sweep `grid` over an already-fetched series.
pub fn optimize_on_candles(
    candles: &[Candle],
    base: &BacktestParams,
    grid: &ParamGrid,
    options: &SweepOptions,
    cancel: Option<&AtomicBool>,
) -> Result<OptimizationResult, BacktestError> {
    base.validate()?;
    let combos = grid.combinations(&base.strategy);
    if combos.is_empty() {
        return Err(ParamError::new(
            "optimizer grid",
            grid.size(),
            "produces no valid parameter combinations",
        )
        .into());
    }

    tracing::info!(
        symbol = %base.symbol,
        timeframe = %base.timeframe,
        points = combos.len(),
        candles = candles.len(),
        "starting grid search"
    );

    let outcomes = evaluate_grid(&combos, options, cancel, |params| {
        let mut run = base.clone();
        run.strategy = *params;
        run_backtest_on_candles(candles, &run).map(|r| r.metrics)
    })?;

    let failed = outcomes.iter().filter(|o| o.is_failed()).count();
    let Some(winner) = select_best(&outcomes) else {
        return Err(BacktestError::InsufficientData {
            symbol: base.symbol.clone(),
            timeframe: base.timeframe,
            required: combos
                .iter()
                .map(StrategyParams::required_candles)
                .max()
                .unwrap_or(0),
            available: candles.len(),
        });
    };

    let mut best_run = base.clone();
    best_run.strategy = winner.params;
    let result = run_backtest_on_candles(candles, &best_run)?;
    let best = GridPoint {
        index: winner.index,
        params: winner.params,
        score: composite_score(&result.metrics),
        result,
    };

    tracing::info!(
        symbol = %base.symbol,
        evaluated = outcomes.len(),
        failed,
        best_index = best.index,
        best_score = best.score,
        "grid search complete"
    );

    Ok(OptimizationResult {
        best,
        evaluated: outcomes.len(),
        failed,
        all: outcomes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> StrategyParams {
        StrategyParams::default()
    }

    /// Higher size and take-profit add profit; a wider stop adds drawdown.
    fn synthetic_metrics(p: &StrategyParams) -> Result<PerformanceMetrics, BacktestError> {
        Ok(PerformanceMetrics {
            profit_percent: p.position_size_pct + p.take_profit_pct - p.stop_loss_pct,
            max_drawdown_percent: p.stop_loss_pct,
            win_rate: 50.0,
            ..Default::default()
        })
    }

    fn best_params(grid: &ParamGrid, options: &SweepOptions) -> StrategyParams {
        let combos = grid.combinations(&base());
        let outcomes = evaluate_grid(&combos, options, None, synthetic_metrics).unwrap();
        select_best(&outcomes).unwrap().params
    }

    #[test]
    fn default_grid_size() {
        assert_eq!(ParamGrid::default().size(), 27);
        assert_eq!(ParamGrid::default().combinations(&base()).len(), 27);
    }

    #[test]
    fn grid_order_is_position_outermost() {
        let grid = ParamGrid::risk_only(vec![5.0, 10.0], vec![1.0, 2.0], vec![3.0]);
        let combos = grid.combinations(&base());
        let order: Vec<(f64, f64)> = combos
            .iter()
            .map(|p| (p.position_size_pct, p.stop_loss_pct))
            .collect();
        assert_eq!(order, vec![(5.0, 1.0), (5.0, 2.0), (10.0, 1.0), (10.0, 2.0)]);
        assert!(combos.iter().all(|p| p.rsi_period == 14 && p.ema_long_period == 21));
    }

    #[test]
    fn invalid_combinations_are_skipped() {
        let grid = ParamGrid {
            ema_short_period: Some(vec![9, 30]),
            ema_long_period: Some(vec![21, 50]),
            rsi_oversold: Some(vec![30.0, 80.0]),
            rsi_overbought: Some(vec![70.0]),
            ..ParamGrid::risk_only(vec![10.0], vec![2.0], vec![4.0])
        };
        assert_eq!(grid.size(), 8);
        let combos = grid.combinations(&base());
        // (9,21), (9,50), (30,50) survive; oversold 80 never does.
        assert_eq!(combos.len(), 3);
        assert!(combos
            .iter()
            .all(|p| p.ema_short_period < p.ema_long_period && p.rsi_oversold < p.rsi_overbought));
    }

    #[test]
    fn dominating_point_wins_regardless_of_order() {
        let forward = ParamGrid::risk_only(vec![10.0, 20.0], vec![1.0, 2.0], vec![4.0, 6.0]);
        let reversed = ParamGrid::risk_only(vec![20.0, 10.0], vec![2.0, 1.0], vec![6.0, 4.0]);
        let mixed = ParamGrid::risk_only(vec![10.0, 20.0], vec![2.0, 1.0], vec![6.0, 4.0]);

        for grid in [forward, reversed, mixed] {
            for options in [
                SweepOptions::default(),
                SweepOptions::default().with_parallelism(false),
                SweepOptions::default().with_max_threads(Some(2)),
            ] {
                let best = best_params(&grid, &options);
                assert_eq!(best.position_size_pct, 20.0);
                assert_eq!(best.stop_loss_pct, 1.0);
                assert_eq!(best.take_profit_pct, 6.0);
            }
        }
    }

    #[test]
    fn ties_keep_first_in_grid_order() {
        let grid = ParamGrid::risk_only(vec![10.0, 10.0], vec![2.0], vec![4.0]);
        let combos = grid.combinations(&base());
        let outcomes =
            evaluate_grid(&combos, &SweepOptions::default(), None, synthetic_metrics).unwrap();
        assert_eq!(select_best(&outcomes).unwrap().index, 0);
    }

    #[test]
    fn failed_points_are_excluded() {
        let grid = ParamGrid::risk_only(vec![10.0, 20.0], vec![2.0], vec![4.0]);
        let combos = grid.combinations(&base());
        let outcomes = evaluate_grid(&combos, &SweepOptions::default(), None, |p| {
            if p.position_size_pct > 15.0 {
                Err(BacktestError::Cancelled)
            } else {
                synthetic_metrics(p)
            }
        })
        .unwrap();
        assert_eq!(outcomes.iter().filter(|o| o.is_failed()).count(), 1);
        assert_eq!(select_best(&outcomes).unwrap().params.position_size_pct, 10.0);
    }

    #[test]
    fn all_failed_selects_nothing() {
        let grid = ParamGrid::risk_only(vec![10.0], vec![2.0], vec![4.0]);
        let combos = grid.combinations(&base());
        let outcomes = evaluate_grid(&combos, &SweepOptions::default(), None, |_| {
            Err(BacktestError::Cancelled)
        })
        .unwrap();
        assert!(select_best(&outcomes).is_none());
    }

    #[test]
    fn preset_cancel_flag_aborts_sweep() {
        let flag = AtomicBool::new(true);
        let combos = ParamGrid::default().combinations(&base());
        let result = evaluate_grid(&combos, &SweepOptions::default(), Some(&flag), synthetic_metrics);
        assert!(matches!(result, Err(BacktestError::Cancelled)));
    }

    #[test]
    fn score_weights() {
        let m = PerformanceMetrics {
            profit_percent: 10.0,
            max_drawdown_percent: 4.0,
            sharpe_ratio: 1.5,
            win_rate: 60.0,
            ..Default::default()
        };
        assert!((composite_score(&m) - (20.0 - 12.0 + 15.0 + 30.0)).abs() < 1e-12);
    }
}
