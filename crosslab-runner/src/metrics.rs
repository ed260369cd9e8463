//! Performance metrics: pure functions that reduce a trade log and an
//! equity curve to strategy statistics.
//!
//! Nothing here touches the data layer or the simulator; every function is
//! trades and/or equity in, scalar out.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crosslab_core::domain::Trade;
use crosslab_core::engine::EquityPoint;

/// Annual risk-free rate used by the Sharpe ratio.
pub const ANNUAL_RISK_FREE_RATE: f64 = 0.02;

/// Days per year for daily-return annualization (crypto trades every day).
pub const DAYS_PER_YEAR: f64 = 365.0;

/// Aggregate performance of one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub final_balance: f64,
    pub total_profit: f64,
    pub profit_percent: f64,
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent, 0..=100.
    pub win_rate: f64,
    pub max_drawdown: f64,
    pub max_drawdown_percent: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
    pub average_win: f64,
    pub average_loss: f64,
    pub largest_win: f64,
    pub largest_loss: f64,
    pub max_consecutive_losses: usize,
    pub average_trade_duration_hours: f64,
    pub daily_returns_count: usize,
}

impl PerformanceMetrics {
    /// Compute every metric from the trade log, equity curve, and starting balance.
    pub fn compute(trades: &[Trade], equity_curve: &[EquityPoint], initial_balance: f64) -> Self {
        let final_balance = equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(initial_balance);
        let total_profit = final_balance - initial_balance;
        let profit_percent = if initial_balance > 0.0 {
            total_profit / initial_balance * 100.0
        } else {
            0.0
        };

        let winning_trades = trades.iter().filter(|t| t.is_winner()).count();
        let (max_dd, peak_at_max_dd) = max_drawdown(equity_curve);
        let returns = daily_returns(equity_curve);

        Self {
            final_balance,
            total_profit,
            profit_percent,
            total_trades: trades.len(),
            winning_trades,
            losing_trades: trades.len() - winning_trades,
            win_rate: win_rate(trades),
            max_drawdown: max_dd,
            max_drawdown_percent: if peak_at_max_dd > 0.0 {
                max_dd / peak_at_max_dd * 100.0
            } else {
                0.0
            },
            sharpe_ratio: sharpe_ratio(&returns, ANNUAL_RISK_FREE_RATE),
            profit_factor: profit_factor(trades),
            average_win: average_win(trades),
            average_loss: average_loss(trades),
            largest_win: trades.iter().map(|t| t.profit).fold(0.0, f64::max),
            largest_loss: trades.iter().map(|t| t.profit).fold(0.0, f64::min),
            max_consecutive_losses: max_consecutive_losses(trades),
            average_trade_duration_hours: mean_f64(
                &trades.iter().map(|t| t.duration_hours).collect::<Vec<_>>(),
            ),
            daily_returns_count: returns.len(),
        }
    }

    /// True when the run ended above its starting balance.
    pub fn is_profitable(&self) -> bool {
        self.total_profit > 0.0
    }
}

// ─── Individual metric functions ────────────────────────────────────

/// Win rate in percent. 0.0 with no trades.
pub fn win_rate(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let winners = trades.iter().filter(|t| t.is_winner()).count();
    winners as f64 / trades.len() as f64 * 100.0
}

/// Largest peak-to-trough decline of the equity curve, with the peak it
/// was measured from.
pub fn max_drawdown(equity_curve: &[EquityPoint]) -> (f64, f64) {
    let mut peak = match equity_curve.first() {
        Some(p) => p.equity,
        None => return (0.0, 0.0),
    };
    let mut max_dd = 0.0;
    let mut peak_at_max = peak;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        }
        let dd = peak - point.equity;
        if dd > max_dd {
            max_dd = dd;
            peak_at_max = peak;
        }
    }
    (max_dd, peak_at_max)
}

/// Annualized Sharpe ratio from daily returns.
///
/// Sharpe = (mean(daily) − rf / 365) / std(daily) × sqrt(365).
/// Returns 0.0 if there are fewer than 2 returns or the deviation is zero.
pub fn sharpe_ratio(daily_returns: &[f64], annual_risk_free_rate: f64) -> f64 {
    if daily_returns.len() < 2 {
        return 0.0;
    }
    let std = std_dev(daily_returns);
    if std < 1e-15 {
        return 0.0;
    }
    let daily_rf = annual_risk_free_rate / DAYS_PER_YEAR;
    (mean_f64(daily_returns) - daily_rf) / std * DAYS_PER_YEAR.sqrt()
}

/// Profit factor: gross profits / gross losses.
///
/// Capped at 100.0 for edge cases (all winners, zero losses).
pub fn profit_factor(trades: &[Trade]) -> f64 {
    if trades.is_empty() {
        return 0.0;
    }
    let gross_profit: f64 = trades
        .iter()
        .filter(|t| t.profit > 0.0)
        .map(|t| t.profit)
        .sum();
    let gross_loss: f64 = trades
        .iter()
        .filter(|t| t.profit < 0.0)
        .map(|t| t.profit.abs())
        .sum();

    if gross_loss < 1e-10 {
        return if gross_profit > 0.0 { 100.0 } else { 0.0 };
    }
    (gross_profit / gross_loss).min(100.0)
}

/// Mean profit of winning trades.
pub fn average_win(trades: &[Trade]) -> f64 {
    let wins: Vec<f64> = trades
        .iter()
        .filter(|t| t.is_winner())
        .map(|t| t.profit)
        .collect();
    mean_f64(&wins)
}

/// Mean profit of losing trades (zero or negative).
pub fn average_loss(trades: &[Trade]) -> f64 {
    let losses: Vec<f64> = trades
        .iter()
        .filter(|t| !t.is_winner())
        .map(|t| t.profit)
        .collect();
    mean_f64(&losses)
}

/// Longest run of consecutive non-winning trades.
pub fn max_consecutive_losses(trades: &[Trade]) -> usize {
    let mut max_streak = 0;
    let mut current = 0;

    for trade in trades {
        if trade.is_winner() {
            current = 0;
        } else {
            current += 1;
            max_streak = max_streak.max(current);
        }
    }
    max_streak
}

// ─── Helpers ────────────────────────────────────────────────────────

/// Relative equity change between consecutive UTC days.
///
/// The curve is resampled to the last sample of each calendar day first,
/// so sub-daily bars do not inflate the count.
pub fn daily_returns(equity_curve: &[EquityPoint]) -> Vec<f64> {
    let mut closes: Vec<(NaiveDate, f64)> = Vec::new();
    for point in equity_curve {
        let day = point.timestamp.date_naive();
        match closes.last_mut() {
            Some((last_day, equity)) if *last_day == day => *equity = point.equity,
            _ => closes.push((day, point.equity)),
        }
    }
    closes
        .windows(2)
        .map(|w| {
            if w[0].1 > 0.0 {
                (w[1].1 - w[0].1) / w[0].1
            } else {
                0.0
            }
        })
        .collect()
}

pub(crate) fn mean_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (n − 1). 0.0 below two values.
pub(crate) fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mean = mean_f64(values);
    let variance =
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (values.len() - 1) as f64;
    variance.sqrt()
}
