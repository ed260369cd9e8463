//! Open position held by the simulator.

use super::candle::Candle;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionSide::Long => "LONG",
            PositionSide::Short => "SHORT",
        }
    }
}

/// The single open position of a run.
///
/// Stop-loss always sits on the losing side of the entry and take-profit on the
/// winning side: below/above entry for longs, above/below for shorts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub side: PositionSide,
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub stop_loss: f64,
    pub take_profit: f64,
    /// Units of the base asset.
    pub size: f64,
}

impl Position {
    /// Open a position with stop-loss and take-profit set as fixed percentages of the entry price.
    pub fn open(
        side: PositionSide,
        entry_bar: usize,
        entry_time: DateTime<Utc>,
        entry_price: f64,
        size: f64,
        stop_loss_pct: f64,
        take_profit_pct: f64,
    ) -> Self {
        let (stop_loss, take_profit) = match side {
            PositionSide::Long => (
                entry_price * (1.0 - stop_loss_pct / 100.0),
                entry_price * (1.0 + take_profit_pct / 100.0),
            ),
            PositionSide::Short => (
                entry_price * (1.0 + stop_loss_pct / 100.0),
                entry_price * (1.0 - take_profit_pct / 100.0),
            ),
        };
        Self {
            side,
            entry_bar,
            entry_time,
            entry_price,
            stop_loss,
            take_profit,
            size,
        }
    }

    pub fn is_long(&self) -> bool {
        self.side == PositionSide::Long
    }

    /// Realized profit if closed at `exit_price`.
    pub fn pnl(&self, exit_price: f64) -> f64 {
        match self.side {
            PositionSide::Long => self.size * (exit_price - self.entry_price),
            PositionSide::Short => self.size * (self.entry_price - exit_price),
        }
    }

    /// True if the candle's range touches the stop-loss.
    pub fn stop_touched(&self, candle: &Candle) -> bool {
        match self.side {
            PositionSide::Long => candle.low <= self.stop_loss,
            PositionSide::Short => candle.high >= self.stop_loss,
        }
    }

    /// True if the candle's range touches the take-profit.
    pub fn target_touched(&self, candle: &Candle) -> bool {
        match self.side {
            PositionSide::Long => candle.high >= self.take_profit,
            PositionSide::Short => candle.low <= self.take_profit,
        }
    }

    /// Notional value at entry.
    pub fn notional(&self) -> f64 {
        self.entry_price * self.size
    }
}
