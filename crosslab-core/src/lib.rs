//! CrossLab Core: candle domain types, indicator pipeline, data layer, position simulator.
//!
//! - Domain types (candles, timeframes, positions, trades)
//! - Offset-aware indicator series (RSI, EMA) computed once per run
//! - Candle providers (Binance REST, CSV, synthetic) behind one trait, plus a Parquet cache
//! - Single-position FLAT / IN_POSITION simulator with stop-loss, take-profit and reversal exits

pub mod data;
pub mod domain;
pub mod engine;
pub mod indicators;
