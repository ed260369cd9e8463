//! CrossLab Runner: backtest orchestration, grid search, robustness validation, screening.
//!
//! This crate builds on `crosslab-core` to provide:
//! - Strategy parameters and the TOML configuration file
//! - Single-backtest runner with performance metrics
//! - Parameter grid search on a rayon pool
//! - Trailing-month robustness validation
//! - Pair screening by liquidity, volatility, spread, and trend
//! - A periodic scheduler and JSON/CSV artifact export

pub mod config;
pub mod export;
pub mod metrics;
pub mod optimizer;
pub mod robustness;
pub mod runner;
pub mod scheduler;
pub mod screening;

pub use config::{
    BacktestConfig, BacktestParams, ConfigError, DataSourceKind, ParamError, StrategyParams,
};
pub use export::{save_artifacts, save_json, ArtifactPaths, ExportError};
pub use metrics::PerformanceMetrics;
pub use optimizer::{
    composite_score, optimize_on_candles, optimize_strategy, select_best, GridPoint,
    GridPointOutcome, OptimizationResult, ParamGrid, SweepOptions,
};
pub use robustness::{
    validate_on_candles, validate_robustness, RobustnessParams, RobustnessReport, WindowOutcome,
};
pub use runner::{run_backtest, run_backtest_on_candles, BacktestError, BacktestResult};
pub use scheduler::{ScheduleSummary, Scheduler};
pub use screening::{analyze_pairs, PairMetrics, ScreeningParams};

#[cfg(test)]
mod send_sync_checks {
    use super::*;

    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}

    #[test]
    fn public_types_are_send_and_sync() {
        assert_send::<BacktestConfig>();
        assert_sync::<BacktestConfig>();
        assert_send::<BacktestParams>();
        assert_sync::<BacktestParams>();
        assert_send::<BacktestResult>();
        assert_sync::<BacktestResult>();
        assert_send::<BacktestError>();
        assert_sync::<BacktestError>();
        assert_send::<OptimizationResult>();
        assert_sync::<OptimizationResult>();
        assert_send::<RobustnessReport>();
        assert_sync::<RobustnessReport>();
        assert_send::<PairMetrics>();
        assert_sync::<PairMetrics>();
        assert_send::<Scheduler>();
        assert_sync::<Scheduler>();
    }
}
