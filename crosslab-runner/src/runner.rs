//! Backtest runner: wires together the candle provider, indicator
//! pipeline, simulator, and metrics.
//!
//! Two entry points:
//! - `run_backtest()`: fetches candles from a provider, then runs. Used by the CLI.
//! - `run_backtest_on_candles()`: takes an already-fetched series. No I/O;
//!   used by the optimizer and the robustness validator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crosslab_core::data::{dataset_hash, CandleProvider, DataError};
use crosslab_core::domain::{Candle, Timeframe, Trade};
use crosslab_core::engine::{simulate, EngineError, EquityPoint, StrategyIndicators};

use crate::config::{BacktestParams, ParamError, StrategyParams};
use crate::metrics::PerformanceMetrics;

/// Errors from a backtest, a sweep, or a validation pass.
#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(
        "insufficient data for {symbol} {timeframe}: need at least {required} candles, got {available}"
    )]
    InsufficientData {
        symbol: String,
        timeframe: Timeframe,
        required: usize,
        available: usize,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(#[from] ParamError),

    #[error("failed to fetch candles for {symbol}: {source}")]
    UpstreamFetchFailure {
        symbol: String,
        #[source]
        source: DataError,
    },

    #[error("engine error: {0}")]
    Engine(EngineError),

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("cancelled")]
    Cancelled,
}

impl BacktestError {
    /// Non-retryable errors that describe the request rather than the data source.
    pub fn is_permanent(&self) -> bool {
        !matches!(self, Self::UpstreamFetchFailure { source, .. } if source.is_transient())
    }
}

/// Current schema version for persisted artifacts.
pub const SCHEMA_VERSION: u32 = 1;

/// Complete result of a single backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    /// Schema version for forward-compatible deserialization.
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_balance: f64,
    pub strategy: StrategyParams,
    pub metrics: PerformanceMetrics,
    pub trades: Vec<Trade>,
    /// `YYYY-MM` → realized percent return of that month.
    pub monthly_returns: BTreeMap<String, f64>,
    pub equity_curve: Vec<EquityPoint>,
    /// BLAKE3 of the candle series the run consumed.
    pub dataset_hash: String,
    pub bar_count: usize,
    pub warmup_bars: usize,
}

/// Default schema version for serde deserialization of older JSON without the field.
fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl BacktestResult {
    pub fn final_balance(&self) -> f64 {
        self.metrics.final_balance
    }
}

/// Fetch the candles for `params` and run the backtest on them.
pub fn run_backtest<P: CandleProvider + ?Sized>(
    provider: &P,
    params: &BacktestParams,
) -> Result<BacktestResult, BacktestError> {
    params.validate()?;

    let candles = fetch_series(
        provider,
        &params.symbol,
        params.timeframe,
        params.start,
        params.end,
    )?;
    let result = run_backtest_on_candles(&candles, params)?;

    tracing::info!(
        symbol = %params.symbol,
        timeframe = %params.timeframe,
        trades = result.metrics.total_trades,
        profit_pct = result.metrics.profit_percent,
        sharpe = result.metrics.sharpe_ratio,
        "backtest complete"
    );
    Ok(result)
}

/// Run a backtest on an already-fetched candle series.
///
/// Pure: no I/O, no wall clock, no randomness. The same inputs always
/// produce the same result.
pub fn run_backtest_on_candles(
    candles: &[Candle],
    params: &BacktestParams,
) -> Result<BacktestResult, BacktestError> {
    params.validate()?;

    let indicators = StrategyIndicators::compute(candles, &params.strategy.periods());
    let engine_config = params.strategy.engine_config(params.initial_balance);
    let output =
        simulate(candles, &indicators, &engine_config).map_err(|e| engine_failure(e, params))?;

    let metrics = PerformanceMetrics::compute(
        &output.trades,
        &output.equity_curve,
        output.initial_balance,
    );

    tracing::debug!(
        symbol = %params.symbol,
        bars = output.bar_count,
        warmup = output.warmup_bars,
        trades = output.trades.len(),
        "simulation finished"
    );

    Ok(BacktestResult {
        schema_version: SCHEMA_VERSION,
        symbol: params.symbol.clone(),
        timeframe: params.timeframe,
        start: params.start,
        end: params.end,
        initial_balance: params.initial_balance,
        strategy: params.strategy,
        metrics,
        trades: output.trades,
        monthly_returns: output.monthly_returns,
        equity_curve: output.equity_curve,
        dataset_hash: dataset_hash(candles),
        bar_count: output.bar_count,
        warmup_bars: output.warmup_bars,
    })
}

/// Fetch a series, tagging provider failures with the symbol.
pub(crate) fn fetch_series<P: CandleProvider + ?Sized>(
    provider: &P,
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<Candle>, BacktestError> {
    tracing::debug!(
        provider = provider.name(),
        symbol,
        %timeframe,
        %start,
        %end,
        "fetching candles"
    );
    provider
        .fetch_candles(symbol, timeframe, start, end)
        .map_err(|source| BacktestError::UpstreamFetchFailure {
            symbol: symbol.to_string(),
            source,
        })
}

fn engine_failure(err: EngineError, params: &BacktestParams) -> BacktestError {
    match err {
        EngineError::EmptySeries => BacktestError::InsufficientData {
            symbol: params.symbol.clone(),
            timeframe: params.timeframe,
            required: params.strategy.required_candles(),
            available: 0,
        },
        EngineError::InsufficientData {
            required,
            available,
        } => BacktestError::InsufficientData {
            symbol: params.symbol.clone(),
            timeframe: params.timeframe,
            required,
            available,
        },
        other => BacktestError::Engine(other),
    }
}
