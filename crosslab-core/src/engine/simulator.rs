//! The FLAT / IN_POSITION state machine.

use super::precompute::StrategyIndicators;
use super::signals::{entry_signal, reversal_exit};
use super::state::{EngineConfig, EngineState, SimulationOutput};
use super::EngineError;
use crate::domain::{Candle, ExitReason, Position, Trade};

/// Run one simulation over `candles` using precomputed `indicators`.
///
/// Deterministic: the same inputs always produce the same output.
pub fn simulate(
    candles: &[Candle],
    indicators: &StrategyIndicators,
    config: &EngineConfig,
) -> Result<SimulationOutput, EngineError> {
    if candles.is_empty() {
        return Err(EngineError::EmptySeries);
    }
    check_alignment(candles.len(), indicators)?;

    let start = indicators.first_tradable_bar().max(1);
    if candles.len() <= start {
        return Err(EngineError::InsufficientData {
            required: start + 1,
            available: candles.len(),
        });
    }

    let last = candles.len() - 1;
    let mut state = EngineState::new(
        config.initial_balance,
        candles[start - 1].timestamp,
        candles.len() - start,
    );

    for (i, candle) in candles.iter().enumerate().skip(start) {
        state.roll_month(candle.timestamp);

        let mut exited = false;
        if let Some(position) = &state.position {
            let exit = if position.stop_touched(candle) {
                Some((position.stop_loss, ExitReason::StopLoss))
            } else if position.target_touched(candle) {
                Some((position.take_profit, ExitReason::TakeProfit))
            } else if reversal_exit(indicators, i, position.side, config) {
                Some((candle.close, ExitReason::TrendReversal))
            } else if i == last {
                Some((candle.close, ExitReason::EndOfData))
            } else {
                None
            };

            if let Some((price, reason)) = exit {
                let trade = Trade::close(position, i, candle.timestamp, price, reason);
                tracing::trace!(
                    bar = i,
                    side = trade.side.as_str(),
                    reason = reason.as_str(),
                    profit = trade.profit,
                    "exit"
                );
                state.close_position(trade);
                exited = true;
            }
        }

        // No re-entry on an exit candle, and nothing opens on the last candle.
        if state.position.is_none() && !exited && i < last && state.balance > 0.0 {
            if let Some(side) = entry_signal(indicators, i, config) {
                let price = candle.close;
                let size = state.balance * config.position_size_pct / 100.0 / price;
                let position = Position::open(
                    side,
                    i,
                    candle.timestamp,
                    price,
                    size,
                    config.stop_loss_pct,
                    config.take_profit_pct,
                );
                tracing::trace!(bar = i, side = side.as_str(), price, size, "entry");
                state.position = Some(position);
            }
        }

        state.mark(candle.timestamp);
    }

    state.close_month();

    Ok(SimulationOutput::from_state(
        state,
        config.initial_balance,
        start,
        candles.len(),
    ))
}

/// Every non-empty indicator series must span exactly the candle series.
fn check_alignment(candles: usize, indicators: &StrategyIndicators) -> Result<(), EngineError> {
    for (name, series) in indicators.named() {
        if !series.is_empty() && series.span() != candles {
            return Err(EngineError::MisalignedIndicator {
                name: name.to_string(),
                span: series.span(),
                candles,
            });
        }
    }
    Ok(())
}
