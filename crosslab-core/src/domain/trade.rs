//! Trade: an immutable record of a closed position.

use super::position::{Position, PositionSide};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Why a position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    TrendReversal,
    /// Force-closed at the last candle's close.
    EndOfData,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::StopLoss => "stop_loss",
            ExitReason::TakeProfit => "take_profit",
            ExitReason::TrendReversal => "trend_reversal",
            ExitReason::EndOfData => "end_of_data",
        }
    }
}

/// A completed round trip: entry → exit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub side: PositionSide,

    // ── Entry ──
    pub entry_bar: usize,
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,

    // ── Exit ──
    pub exit_bar: usize,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    pub exit_reason: ExitReason,

    pub size: f64,

    // ── PnL ──
    pub profit: f64,
    /// Profit relative to the entry notional, in percent.
    pub profit_pct: f64,

    pub duration_hours: f64,
}

impl Trade {
    /// Close `position` at `exit_price`.
    pub fn close(
        position: &Position,
        exit_bar: usize,
        exit_time: DateTime<Utc>,
        exit_price: f64,
        exit_reason: ExitReason,
    ) -> Self {
        let profit = position.pnl(exit_price);
        let notional = position.notional();
        let profit_pct = if notional > 0.0 {
            profit / notional * 100.0
        } else {
            0.0
        };
        let duration_hours = (exit_time - position.entry_time).num_seconds() as f64 / 3600.0;

        Self {
            side: position.side,
            entry_bar: position.entry_bar,
            entry_time: position.entry_time,
            entry_price: position.entry_price,
            exit_bar,
            exit_time,
            exit_price,
            exit_reason,
            size: position.size,
            profit,
            profit_pct,
            duration_hours,
        }
    }

    pub fn is_winner(&self) -> bool {
        self.profit > 0.0
    }
}
