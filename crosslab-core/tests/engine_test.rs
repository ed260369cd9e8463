//! End-to-end simulator scenarios through the public API.

use chrono::{DateTime, Duration, TimeZone, Utc};
use crosslab_core::domain::{Candle, ExitReason, PositionSide};
use crosslab_core::engine::{
    simulate, EngineConfig, EngineError, IndicatorPeriods, StrategyIndicators,
};
use crosslab_core::indicators::{ema_values, rsi_values, IndicatorSeries};

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap()
}

fn candles_from_closes(closes: &[f64], wick: f64) -> Vec<Candle> {
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                timestamp: base_time() + Duration::hours(i as i64),
                open,
                high: open.max(close) + wick,
                low: open.min(close) - wick,
                close,
                volume: 500.0,
            }
        })
        .collect()
}

/// Full-length reference EMA with NaN during warm-up.
fn reference_ema(closes: &[f64], period: usize) -> Vec<f64> {
    let mut out = vec![f64::NAN; closes.len()];
    if closes.len() < period {
        return out;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut prev = closes[..period].iter().sum::<f64>() / period as f64;
    out[period - 1] = prev;
    for i in period..closes.len() {
        prev = alpha * closes[i] + (1.0 - alpha) * prev;
        out[i] = prev;
    }
    out
}

#[test]
fn single_long_entry_at_the_cross_bar() {
    // Series are set by hand so the entry rule is checked in isolation;
    // `computed_indicators_enter_at_the_reference_cross` covers the pipeline.
    // 200 flat-ish candles; short EMA sits under the long EMA until bar 120,
    // where it crosses above while RSI dips to 25 and then recovers.
    let n = 200;
    let cross = 120;
    let closes: Vec<f64> = (0..n).map(|i| 100.0 + 0.005 * i as f64).collect();
    let candles = candles_from_closes(&closes, 0.25);

    let ema_short: Vec<f64> = (8..n)
        .map(|i| if i < cross { 99.0 } else { 101.0 })
        .collect();
    let ema_long: Vec<f64> = (20..n).map(|_| 100.0).collect();
    let rsi: Vec<f64> = (14..n)
        .map(|i| match i {
            i if i == cross => 25.0,
            i if i == cross - 1 || i == cross + 1 => 35.0,
            _ => 50.0,
        })
        .collect();

    let indicators = StrategyIndicators::from_series(
        IndicatorSeries::new(rsi, 14),
        IndicatorSeries::new(ema_short, 8),
        IndicatorSeries::new(ema_long, 20),
    );

    let out = simulate(&candles, &indicators, &EngineConfig::default()).unwrap();

    assert_eq!(out.trades.len(), 1);
    let trade = &out.trades[0];
    assert_eq!(trade.side, PositionSide::Long);
    assert_eq!(trade.entry_bar, cross);
    assert_eq!(trade.entry_price, candles[cross].close);
    assert_eq!(trade.entry_time, candles[cross].timestamp);
    assert_eq!(trade.exit_reason, ExitReason::EndOfData);
    assert_eq!(trade.exit_bar, n - 1);
}

#[test]
fn computed_indicators_enter_at_the_reference_cross() {
    // 60 bars down, then a steady climb: EMA 9 crosses above EMA 21 shortly
    // after the turn while RSI is still recovering.
    let closes: Vec<f64> = (0..100)
        .map(|i| {
            if i < 60 {
                100.0 - 0.5 * i as f64
            } else {
                70.5 + 1.5 * (i - 60) as f64
            }
        })
        .collect();
    let candles = candles_from_closes(&closes, 0.25);
    let periods = IndicatorPeriods::default();
    let config = EngineConfig {
        rsi_oversold: 90.0,
        rsi_overbought: 99.0,
        ..EngineConfig::default()
    };

    let short = reference_ema(&closes, periods.ema_short);
    let long = reference_ema(&closes, periods.ema_long);
    let expected = (1..closes.len() - 1).find(|&i| {
        let rsi = rsi_values(&closes[..=i], periods.rsi).last().copied();
        short[i - 1] < long[i - 1]
            && short[i] > long[i]
            && rsi.is_some_and(|r| r < config.rsi_oversold)
    });
    let expected = expected.expect("the climb produces a cross");
    assert!(expected > 60);

    let indicators = StrategyIndicators::compute(&candles, &periods);
    let out = simulate(&candles, &indicators, &config).unwrap();

    let first = &out.trades[0];
    assert_eq!(first.side, PositionSide::Long);
    assert_eq!(first.entry_bar, expected);
    assert_eq!(first.entry_price, closes[expected]);
}

#[test]
fn monthly_returns_skip_the_warmup_month() {
    // Daily candles from Jan 11: warm-up ends on Jan 31, trading starts Feb 1.
    let start = Utc.with_ymd_and_hms(2024, 1, 11, 0, 0, 0).unwrap();
    let candles: Vec<Candle> = (0..60)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.3).sin() * 3.0;
            Candle {
                timestamp: start + Duration::days(i),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 100.0,
            }
        })
        .collect();
    let indicators = StrategyIndicators::compute(&candles, &IndicatorPeriods::default());
    let out = simulate(&candles, &indicators, &EngineConfig::default()).unwrap();

    assert_eq!(out.warmup_bars, 21);
    let months: Vec<&str> = out.monthly_returns.keys().map(String::as_str).collect();
    assert_eq!(months, vec!["2024-02", "2024-03"]);
}

#[test]
fn stop_loss_fills_at_stop_level_even_when_target_also_touched() {
    let n = 60;
    let closes = vec![100.0; n];
    let mut candles = candles_from_closes(&closes, 0.1);
    // Entry at bar 40 (close 100): stop 98, target 104. Bar 41 spans both.
    candles[41].high = 106.0;
    candles[41].low = 95.0;

    let ema_short: Vec<f64> = (8..n).map(|i| if i < 40 { 9.0 } else { 11.0 }).collect();
    let ema_long: Vec<f64> = (20..n).map(|_| 10.0).collect();
    let rsi: Vec<f64> = (14..n).map(|i| if i == 40 { 20.0 } else { 50.0 }).collect();
    let indicators = StrategyIndicators::from_series(
        IndicatorSeries::new(rsi, 14),
        IndicatorSeries::new(ema_short, 8),
        IndicatorSeries::new(ema_long, 20),
    );

    let out = simulate(&candles, &indicators, &EngineConfig::default()).unwrap();

    assert_eq!(out.trades.len(), 1);
    let trade = &out.trades[0];
    assert_eq!(trade.exit_reason, ExitReason::StopLoss);
    assert!((trade.exit_price - 98.0).abs() < 1e-9);
    assert!(trade.exit_time > trade.entry_time);
}

#[test]
fn shorter_than_warmup_is_insufficient_data() {
    let candles = candles_from_closes(&[100.0; 15], 0.5);
    let indicators = StrategyIndicators::compute(&candles, &IndicatorPeriods::default());
    let err = simulate(&candles, &indicators, &EngineConfig::default()).unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { available: 15, .. }));
}

#[test]
fn indicator_lookups_line_up_with_candle_indices() {
    let closes: Vec<f64> = (0..150)
        .map(|i| 100.0 + (i as f64 * 0.17).sin() * 4.0 + i as f64 * 0.02)
        .collect();
    let candles = candles_from_closes(&closes, 0.5);
    let periods = IndicatorPeriods {
        rsi: 14,
        ema_short: 9,
        ema_long: 21,
    };
    let ind = StrategyIndicators::compute(&candles, &periods);

    for (period, series) in [(9, &ind.ema_short), (21, &ind.ema_long)] {
        let reference = reference_ema(&closes, period);
        for (i, expected) in reference.iter().enumerate() {
            match series.at(i) {
                Some(v) => assert!((v - expected).abs() < 1e-9, "ema_{period} at {i}"),
                None => assert!(expected.is_nan(), "ema_{period} missing at {i}"),
            }
        }
    }

    // RSI value at candle i only uses closes up to i.
    let rsi_full = rsi_values(&closes, 14);
    for i in 14..closes.len() {
        let prefix = rsi_values(&closes[..=i], 14);
        assert_eq!(ind.rsi.at(i), prefix.last().copied(), "rsi at {i}");
        assert_eq!(ind.rsi.at(i), Some(rsi_full[i - 14]));
    }
    assert_eq!(ind.rsi.at(13), None);
    assert_eq!(ema_values(&closes, 21).len(), closes.len() - 20);
}

#[test]
fn rerun_is_bit_identical() {
    let closes: Vec<f64> = (0..400)
        .map(|i| 100.0 + (i as f64 * 0.07).sin() * 8.0 + (i as f64 * 0.31).cos() * 2.0)
        .collect();
    let candles = candles_from_closes(&closes, 0.8);
    let periods = IndicatorPeriods {
        rsi: 7,
        ema_short: 5,
        ema_long: 13,
    };
    let config = EngineConfig {
        rsi_oversold: 45.0,
        rsi_overbought: 55.0,
        ..EngineConfig::default()
    };

    let run = || {
        let ind = StrategyIndicators::compute(&candles, &periods);
        simulate(&candles, &ind, &config).unwrap()
    };
    let a = run();
    let b = run();

    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}
