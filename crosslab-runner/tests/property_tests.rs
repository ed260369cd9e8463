//! Property tests for analyzer and optimizer invariants.
//!
//! 1. winning + losing == total, rates and drawdown percents stay in range
//! 2. Profit figures agree with the equity curve
//! 3. The optimizer's winner scores at least as high as every evaluated point

use chrono::{Duration, TimeZone, Utc};
use crosslab_core::domain::{Candle, Timeframe};
use crosslab_runner::{
    optimize_on_candles, run_backtest_on_candles, BacktestParams, ParamGrid, StrategyParams,
    SweepOptions,
};
use proptest::prelude::*;

fn arb_candles() -> impl Strategy<Value = Vec<Candle>> {
    prop::collection::vec((-0.04..0.04_f64, 0.0..0.02_f64), 40..400).prop_map(|steps| {
        let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut price = 50.0;
        steps
            .iter()
            .enumerate()
            .map(|(i, (r, wick))| {
                let open = price;
                let close = price * (1.0 + r);
                price = close;
                Candle {
                    timestamp: base + Duration::hours(i as i64),
                    open,
                    high: open.max(close) * (1.0 + wick),
                    low: open.min(close) * (1.0 - wick),
                    close,
                    volume: 10.0,
                }
            })
            .collect()
    })
}

fn arb_strategy() -> impl Strategy<Value = StrategyParams> {
    (
        2usize..15,
        2usize..8,
        1usize..12,
        20.0..50.0_f64,
        1.0..100.0_f64,
        0.5..5.0_f64,
        0.5..10.0_f64,
    )
        .prop_map(|(rsi, short, gap, oversold, size, sl, tp)| StrategyParams {
            rsi_period: rsi,
            ema_short_period: short,
            ema_long_period: short + gap,
            rsi_oversold: oversold,
            rsi_overbought: 100.0 - oversold,
            position_size_pct: size,
            stop_loss_pct: sl,
            take_profit_pct: tp,
        })
}

fn params_for(candles: &[Candle], strategy: StrategyParams) -> BacktestParams {
    BacktestParams {
        symbol: "PROP".into(),
        timeframe: Timeframe::H1,
        start: candles[0].timestamp,
        end: candles[candles.len() - 1].timestamp + Duration::hours(1),
        initial_balance: 10_000.0,
        strategy,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn metrics_stay_consistent(candles in arb_candles(), strategy in arb_strategy()) {
        let params = params_for(&candles, strategy);
        let result = run_backtest_on_candles(&candles, &params).unwrap();
        let m = &result.metrics;

        prop_assert_eq!(m.winning_trades + m.losing_trades, m.total_trades);
        prop_assert!((0.0..=100.0).contains(&m.win_rate));
        prop_assert!((0.0..=100.0).contains(&m.max_drawdown_percent));
        prop_assert!(m.sharpe_ratio.is_finite());
        prop_assert!(m.max_consecutive_losses <= m.losing_trades);

        let last = result.equity_curve.last().unwrap().equity;
        prop_assert_eq!(last, m.final_balance);
        prop_assert!((m.total_profit - (last - params.initial_balance)).abs() < 1e-6);
        let summed: f64 = result.trades.iter().map(|t| t.profit).sum();
        prop_assert!((summed - m.total_profit).abs() < 1e-6);
    }

    #[test]
    fn optimizer_winner_dominates(candles in arb_candles()) {
        let params = params_for(&candles, StrategyParams {
            ema_short_period: 3,
            ema_long_period: 8,
            rsi_period: 5,
            ..StrategyParams::default()
        });
        let grid = ParamGrid::risk_only(vec![10.0, 50.0], vec![1.0, 4.0], vec![2.0, 8.0]);
        let result = optimize_on_candles(&candles, &params, &grid, &SweepOptions::default(), None)
            .unwrap();
        for outcome in &result.all {
            prop_assert!(outcome.score.unwrap() <= result.best.score);
        }
    }
}
