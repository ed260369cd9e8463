//! Engine configuration, per-run mutable state, and run output.

use crate::domain::{Position, Trade};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trading rules for one simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_balance: f64,
    /// Share of the current balance committed per entry, in percent.
    pub position_size_pct: f64,
    pub stop_loss_pct: f64,
    pub take_profit_pct: f64,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            position_size_pct: 10.0,
            stop_loss_pct: 2.0,
            take_profit_pct: 4.0,
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
        }
    }
}

/// One equity sample. Equity is the realized balance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    /// Largest peak-to-trough decline seen up to and including this sample.
    pub max_drawdown: f64,
}

/// `YYYY-MM` key of the UTC month containing `ts`.
pub fn month_key(ts: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", ts.year(), ts.month())
}

/// Mutable state that evolves candle by candle. Scoped to a single run.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub balance: f64,
    pub position: Option<Position>,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub peak: f64,
    pub max_drawdown: f64,
    /// Running peak at the moment `max_drawdown` was set.
    pub peak_at_max_drawdown: f64,
    /// Month of the last simulated candle; `None` until the first one.
    current_month: Option<String>,
    month_start_balance: f64,
    pub monthly_returns: BTreeMap<String, f64>,
}

impl EngineState {
    /// Fresh state seeded with the initial balance at `seed_time`.
    pub fn new(initial_balance: f64, seed_time: DateTime<Utc>, capacity: usize) -> Self {
        let mut equity_curve = Vec::with_capacity(capacity + 1);
        equity_curve.push(EquityPoint {
            timestamp: seed_time,
            equity: initial_balance,
            max_drawdown: 0.0,
        });
        Self {
            balance: initial_balance,
            position: None,
            trades: Vec::new(),
            equity_curve,
            peak: initial_balance,
            max_drawdown: 0.0,
            peak_at_max_drawdown: initial_balance,
            current_month: None,
            month_start_balance: initial_balance,
            monthly_returns: BTreeMap::new(),
        }
    }

    /// Record the finished month's return if `ts` falls in a new month.
    ///
    /// The first call only opens a month, so the seed candle never gets an entry.
    pub fn roll_month(&mut self, ts: DateTime<Utc>) {
        let key = month_key(ts);
        if self.current_month.as_deref() != Some(key.as_str()) {
            self.close_month();
            self.current_month = Some(key);
            self.month_start_balance = self.balance;
        }
    }

    /// Record the current month's return so far under its key.
    pub fn close_month(&mut self) {
        let Some(month) = &self.current_month else {
            return;
        };
        let ret = if self.month_start_balance > 0.0 {
            (self.balance - self.month_start_balance) / self.month_start_balance * 100.0
        } else {
            0.0
        };
        self.monthly_returns.insert(month.clone(), ret);
    }

    /// Close the open position, realizing its profit into the balance.
    pub fn close_position(&mut self, trade: Trade) {
        self.balance += trade.profit;
        self.position = None;
        self.trades.push(trade);
    }

    /// Update drawdown tracking and append an equity sample.
    pub fn mark(&mut self, ts: DateTime<Utc>) {
        let equity = self.balance;
        if equity > self.peak {
            self.peak = equity;
        }
        let drawdown = self.peak - equity;
        if drawdown > self.max_drawdown {
            self.max_drawdown = drawdown;
            self.peak_at_max_drawdown = self.peak;
        }
        self.equity_curve.push(EquityPoint {
            timestamp: ts,
            equity,
            max_drawdown: self.max_drawdown,
        });
    }
}

/// Everything a simulation run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationOutput {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    /// One seed sample plus one sample per simulated candle.
    pub equity_curve: Vec<EquityPoint>,
    pub max_drawdown: f64,
    pub peak_at_max_drawdown: f64,
    /// Percent return per `YYYY-MM` month, in calendar order.
    pub monthly_returns: BTreeMap<String, f64>,
    /// Index of the first simulated candle.
    pub warmup_bars: usize,
    pub bar_count: usize,
}

impl SimulationOutput {
    pub(crate) fn from_state(
        state: EngineState,
        initial_balance: f64,
        warmup_bars: usize,
        bar_count: usize,
    ) -> Self {
        Self {
            initial_balance,
            final_balance: state.balance,
            trades: state.trades,
            equity_curve: state.equity_curve,
            max_drawdown: state.max_drawdown,
            peak_at_max_drawdown: state.peak_at_max_drawdown,
            monthly_returns: state.monthly_returns,
            warmup_bars,
            bar_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, m, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn month_key_is_zero_padded() {
        assert_eq!(month_key(ts(3, 15)), "2024-03");
    }

    #[test]
    fn drawdown_tracks_peak_at_worst_point() {
        let mut st = EngineState::new(100.0, ts(1, 1), 4);
        st.balance = 120.0;
        st.mark(ts(1, 2));
        st.balance = 90.0;
        st.mark(ts(1, 3));
        st.balance = 130.0;
        st.mark(ts(1, 4));
        st.balance = 115.0;
        st.mark(ts(1, 5));

        assert_eq!(st.max_drawdown, 30.0);
        assert_eq!(st.peak_at_max_drawdown, 120.0);
        assert_eq!(st.equity_curve.len(), 5);
        assert_eq!(st.equity_curve[4].max_drawdown, 30.0);
    }

    #[test]
    fn month_roll_records_previous_month() {
        let mut st = EngineState::new(100.0, ts(1, 30), 0);
        st.roll_month(ts(1, 31));
        st.balance = 110.0;
        st.roll_month(ts(2, 1));
        st.balance = 99.0;
        st.close_month();

        assert!((st.monthly_returns["2024-01"] - 10.0).abs() < 1e-10);
        assert!((st.monthly_returns["2024-02"] + 10.0).abs() < 1e-10);
    }

    #[test]
    fn seed_month_without_simulated_candles_has_no_entry() {
        let mut st = EngineState::new(100.0, ts(1, 31), 0);
        st.roll_month(ts(2, 1));
        st.balance = 105.0;
        st.close_month();

        assert!(!st.monthly_returns.contains_key("2024-01"));
        assert_eq!(st.monthly_returns.len(), 1);
        assert!((st.monthly_returns["2024-02"] - 5.0).abs() < 1e-10);
    }
}
