//! Position lifecycle simulator.
//!
//! The engine consumes a candle series plus the strategy's precomputed
//! indicator series and walks the candles once, in timestamp order:
//!
//! 1. Month boundary: close out the previous month's return bucket
//! 2. Exits (if in a position): stop-loss, then take-profit, then trend reversal
//! 3. Entries (only if flat and nothing closed on this candle)
//! 4. Equity and drawdown bookkeeping
//!
//! A position still open after the last candle is closed at its close.

pub mod precompute;
pub mod signals;
pub mod simulator;
pub mod state;

pub use precompute::{IndicatorPeriods, StrategyIndicators};
pub use signals::{entry_signal, reversal_exit};
pub use simulator::simulate;
pub use state::{EngineConfig, EngineState, EquityPoint, SimulationOutput};

use thiserror::Error;

/// Errors from a simulation run. None of these are retryable.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("candle series is empty")]
    EmptySeries,

    #[error("insufficient data: need at least {required} candles, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("indicator '{name}' spans {span} candles but the series has {candles}")]
    MisalignedIndicator {
        name: String,
        span: usize,
        candles: usize,
    },
}
