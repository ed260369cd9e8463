//! Entry and reversal-exit conditions.

use super::precompute::StrategyIndicators;
use super::state::EngineConfig;
use crate::domain::PositionSide;

/// Short/long EMA pair at candles `bar - 1` and `bar`, if both are past warm-up.
fn ema_pairs(ind: &StrategyIndicators, bar: usize) -> Option<((f64, f64), (f64, f64))> {
    let prev = bar.checked_sub(1)?;
    Some((
        (ind.ema_short.at(prev)?, ind.ema_long.at(prev)?),
        (ind.ema_short.at(bar)?, ind.ema_long.at(bar)?),
    ))
}

/// Entry side for candle `bar`, if any.
///
/// Long: short EMA crosses above long EMA while RSI is below the oversold line.
/// Short: short EMA crosses below long EMA while RSI is above the overbought line.
pub fn entry_signal(
    ind: &StrategyIndicators,
    bar: usize,
    config: &EngineConfig,
) -> Option<PositionSide> {
    let ((prev_s, prev_l), (s, l)) = ema_pairs(ind, bar)?;
    let rsi = ind.rsi.at(bar)?;

    if prev_s < prev_l && s > l && rsi < config.rsi_oversold {
        Some(PositionSide::Long)
    } else if prev_s > prev_l && s < l && rsi > config.rsi_overbought {
        Some(PositionSide::Short)
    } else {
        None
    }
}

/// True if the trend has flipped against an open `side` position on candle `bar`.
///
/// Long exits when the short EMA drops below the long EMA with RSI overbought;
/// short exits when it rises above with RSI oversold.
pub fn reversal_exit(
    ind: &StrategyIndicators,
    bar: usize,
    side: PositionSide,
    config: &EngineConfig,
) -> bool {
    let Some(((prev_s, prev_l), (s, l))) = ema_pairs(ind, bar) else {
        return false;
    };
    let Some(rsi) = ind.rsi.at(bar) else {
        return false;
    };

    match side {
        PositionSide::Long => prev_s >= prev_l && s < l && rsi > config.rsi_overbought,
        PositionSide::Short => prev_s <= prev_l && s > l && rsi < config.rsi_oversold,
    }
}
