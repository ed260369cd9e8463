//! Strategy parameters, run parameters, and the TOML configuration file.
//!
//! Every section of the file has serde defaults, so a partial file (or an
//! empty one) produces a runnable configuration.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crosslab_core::domain::Timeframe;
use crosslab_core::engine::{EngineConfig, IndicatorPeriods};

use crate::optimizer::ParamGrid;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    ParseError(String),

    #[error("invalid configuration: {0}")]
    ValidationError(#[from] ParamError),
}

/// A rejected parameter, with the value that was supplied.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{param} = {value}: {reason}")]
pub struct ParamError {
    pub param: String,
    pub value: String,
    pub reason: String,
}

impl ParamError {
    pub fn new(param: &str, value: impl fmt::Display, reason: &str) -> Self {
        Self {
            param: param.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ─── Strategy parameters ────────────────────────────────────────────

/// Tunable parameters of the EMA-cross / RSI strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyParams {
    pub rsi_period: usize,
    pub ema_short_period: usize,
    pub ema_long_period: usize,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    /// Percent of the current balance committed per entry.
    pub position_size_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
}

impl Default for StrategyParams {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            ema_short_period: 9,
            ema_long_period: 21,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            position_size_pct: 10.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
        }
    }
}

impl StrategyParams {
    /// Check every parameter, reporting the first one that is out of range.
    pub fn validate(&self) -> Result<(), ParamError> {
        for (name, period) in [
            ("rsi_period", self.rsi_period),
            ("ema_short_period", self.ema_short_period),
            ("ema_long_period", self.ema_long_period),
        ] {
            if period == 0 {
                return Err(ParamError::new(name, period, "must be greater than zero"));
            }
        }
        if self.ema_short_period >= self.ema_long_period {
            return Err(ParamError::new(
                "ema_short_period",
                self.ema_short_period,
                &format!("must be less than ema_long_period ({})", self.ema_long_period),
            ));
        }
        if !(self.rsi_oversold > 0.0 && self.rsi_oversold < 100.0) {
            return Err(ParamError::new(
                "rsi_oversold",
                self.rsi_oversold,
                "must lie strictly between 0 and 100",
            ));
        }
        if !(self.rsi_overbought > 0.0 && self.rsi_overbought < 100.0) {
            return Err(ParamError::new(
                "rsi_overbought",
                self.rsi_overbought,
                "must lie strictly between 0 and 100",
            ));
        }
        if self.rsi_oversold >= self.rsi_overbought {
            return Err(ParamError::new(
                "rsi_oversold",
                self.rsi_oversold,
                &format!("must be less than rsi_overbought ({})", self.rsi_overbought),
            ));
        }
        if !(self.position_size_pct > 0.0 && self.position_size_pct <= 100.0) {
            return Err(ParamError::new(
                "position_size_pct",
                self.position_size_pct,
                "must be in (0, 100]",
            ));
        }
        if !(self.stop_loss_pct > 0.0 && self.stop_loss_pct < 100.0) {
            return Err(ParamError::new(
                "stop_loss_pct",
                self.stop_loss_pct,
                "must be in (0, 100)",
            ));
        }
        if !(self.take_profit_pct > 0.0 && self.take_profit_pct.is_finite()) {
            return Err(ParamError::new(
                "take_profit_pct",
                self.take_profit_pct,
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    pub fn periods(&self) -> IndicatorPeriods {
        IndicatorPeriods {
            rsi: self.rsi_period,
            ema_short: self.ema_short_period,
            ema_long: self.ema_long_period,
        }
    }

    pub fn engine_config(&self, initial_balance: f64) -> EngineConfig {
        EngineConfig {
            initial_balance,
            position_size_pct: self.position_size_pct,
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
            rsi_oversold: self.rsi_oversold,
            rsi_overbought: self.rsi_overbought,
        }
    }

    /// Minimum candle count for at least one bar to be simulated.
    pub fn required_candles(&self) -> usize {
        self.rsi_period
            .max(self.ema_short_period)
            .max(self.ema_long_period)
            .max(1)
            + 1
    }
}

// ─── Run parameters ─────────────────────────────────────────────────

/// Everything needed to reproduce a single backtest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestParams {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub initial_balance: f64,
    pub strategy: StrategyParams,
}

impl BacktestParams {
    pub fn validate(&self) -> Result<(), ParamError> {
        if self.symbol.trim().is_empty() {
            return Err(ParamError::new("symbol", "\"\"", "must not be empty"));
        }
        if self.end <= self.start {
            return Err(ParamError::new(
                "end",
                self.end.to_rfc3339(),
                &format!("must be after start ({})", self.start.to_rfc3339()),
            ));
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

// ─── Configuration file ─────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestConfig {
    #[serde(default)]
    pub backtest: BacktestSection,

    #[serde(default)]
    pub strategy: StrategyParams,

    #[serde(default)]
    pub optimizer: OptimizerSection,

    #[serde(default)]
    pub robustness: RobustnessSection,

    #[serde(default)]
    pub data: DataSection,
}

impl BacktestConfig {
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.strategy.validate()?;
        if !(self.backtest.initial_balance > 0.0) {
            return Err(ParamError::new(
                "backtest.initial_balance",
                self.backtest.initial_balance,
                "must be greater than zero",
            )
            .into());
        }
        if self.backtest.lookback_days <= 0 {
            return Err(ParamError::new(
                "backtest.lookback_days",
                self.backtest.lookback_days,
                "must be greater than zero",
            )
            .into());
        }
        if let (Some(start), Some(end)) = (self.backtest.start, self.backtest.end) {
            if end <= start {
                return Err(ParamError::new(
                    "backtest.end",
                    end.to_rfc3339(),
                    "must be after backtest.start",
                )
                .into());
            }
        }
        if self.robustness.months == 0 {
            return Err(ParamError::new("robustness.months", 0, "must be at least 1").into());
        }
        if self.optimizer.max_threads == Some(0) {
            return Err(ParamError::new("optimizer.max_threads", 0, "must be at least 1").into());
        }
        Ok(())
    }

    /// Resolve the `[backtest]` and `[strategy]` sections into run parameters.
    ///
    /// A missing `end` means `now`; a missing `start` means `lookback_days`
    /// before the end.
    pub fn backtest_params(&self, now: DateTime<Utc>) -> BacktestParams {
        let end = self.backtest.end.unwrap_or(now);
        let start = self
            .backtest
            .start
            .unwrap_or(end - Duration::days(self.backtest.lookback_days));
        BacktestParams {
            symbol: self.backtest.symbol.clone(),
            timeframe: self.backtest.timeframe,
            start,
            end,
            initial_balance: self.backtest.initial_balance,
            strategy: self.strategy,
        }
    }
}

/// `[backtest]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSection {
    #[serde(default = "default_symbol")]
    pub symbol: String,

    #[serde(default = "default_timeframe")]
    pub timeframe: Timeframe,

    #[serde(default)]
    pub start: Option<DateTime<Utc>>,

    #[serde(default)]
    pub end: Option<DateTime<Utc>>,

    /// Range length used when `start` is not given.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
}

fn default_symbol() -> String {
    "BTCUSDT".to_string()
}

fn default_timeframe() -> Timeframe {
    Timeframe::H1
}

fn default_lookback_days() -> i64 {
    90
}

fn default_initial_balance() -> f64 {
    10_000.0
}

impl Default for BacktestSection {
    fn default() -> Self {
        Self {
            symbol: default_symbol(),
            timeframe: default_timeframe(),
            start: None,
            end: None,
            lookback_days: default_lookback_days(),
            initial_balance: default_initial_balance(),
        }
    }
}

/// `[optimizer]`: the grid lists plus the worker cap.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OptimizerSection {
    #[serde(flatten)]
    pub grid: ParamGrid,

    /// Dedicated pool size; `None` uses rayon's global pool.
    #[serde(default)]
    pub max_threads: Option<usize>,
}

/// `[robustness]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustnessSection {
    #[serde(default = "default_months")]
    pub months: u32,

    /// Balance every window starts from.
    #[serde(default = "default_initial_balance")]
    pub initial_balance: f64,
}

fn default_months() -> u32 {
    6
}

impl Default for RobustnessSection {
    fn default() -> Self {
        Self {
            months: default_months(),
            initial_balance: default_initial_balance(),
        }
    }
}

/// Where candles come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSourceKind {
    #[default]
    Binance,
    Csv,
    Synthetic,
}

/// `[data]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSection {
    #[serde(default)]
    pub source: DataSourceKind,

    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    #[serde(default = "default_csv_dir")]
    pub csv_dir: PathBuf,

    /// Override for the exchange REST endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_csv_dir() -> PathBuf {
    PathBuf::from("csv")
}

impl Default for DataSection {
    fn default() -> Self {
        Self {
            source: DataSourceKind::default(),
            cache_dir: default_cache_dir(),
            csv_dir: default_csv_dir(),
            base_url: None,
        }
    }
}
