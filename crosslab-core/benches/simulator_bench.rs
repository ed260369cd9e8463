//! Criterion benchmarks for the simulation hot path.
//!
//! 1. Indicator precompute (RSI + two EMAs)
//! 2. Full simulator pass over precomputed indicators

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use chrono::{Duration, TimeZone, Utc};
use crosslab_core::domain::Candle;
use crosslab_core::engine::{simulate, EngineConfig, IndicatorPeriods, StrategyIndicators};

fn make_candles(n: usize) -> Vec<Candle> {
    let base = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
    (0..n)
        .map(|i| {
            let close = 100.0 + (i as f64 * 0.05).sin() * 10.0 + (i as f64 * 0.013).cos() * 4.0;
            Candle {
                timestamp: base + Duration::hours(i as i64),
                open: close - 0.3,
                high: close + 1.5,
                low: close - 1.5,
                close,
                volume: 1_000.0 + (i % 500) as f64,
            }
        })
        .collect()
}

fn bench_precompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("precompute");
    for n in [1_000usize, 10_000, 50_000] {
        let candles = make_candles(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &candles, |b, candles| {
            b.iter(|| StrategyIndicators::compute(black_box(candles), &IndicatorPeriods::default()))
        });
    }
    group.finish();
}

fn bench_simulate(c: &mut Criterion) {
    let mut group = c.benchmark_group("simulate");
    let config = EngineConfig {
        rsi_oversold: 45.0,
        rsi_overbought: 55.0,
        ..EngineConfig::default()
    };
    for n in [1_000usize, 10_000, 50_000] {
        let candles = make_candles(n);
        let ind = StrategyIndicators::compute(&candles, &IndicatorPeriods::default());
        group.bench_with_input(BenchmarkId::from_parameter(n), &candles, |b, candles| {
            b.iter(|| simulate(black_box(candles), &ind, &config))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_precompute, bench_simulate);
criterion_main!(benches);
