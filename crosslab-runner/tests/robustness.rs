//! Robustness validation over trailing monthly windows.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use crosslab_core::data::{CandleProvider, DataError, SyntheticProvider};
use crosslab_core::domain::{Candle, Timeframe};
use crosslab_runner::{
    validate_on_candles, validate_robustness, BacktestError, RobustnessParams, StrategyParams,
    SweepOptions,
};

/// Synthetic candles, optionally only from `available_from` on, counting fetches.
struct CountingProvider {
    inner: SyntheticProvider,
    available_from: Option<DateTime<Utc>>,
    calls: AtomicUsize,
}

impl CountingProvider {
    fn new(available_from: Option<DateTime<Utc>>) -> Self {
        Self {
            inner: SyntheticProvider::new(),
            available_from,
            calls: AtomicUsize::new(0),
        }
    }
}

impl CandleProvider for CountingProvider {
    fn name(&self) -> &str {
        "counting"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut candles = self.inner.fetch_candles(symbol, timeframe, start, end)?;
        if let Some(from) = self.available_from {
            candles.retain(|c| c.timestamp >= from);
        }
        Ok(candles)
    }

    fn is_available(&self) -> bool {
        true
    }
}

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
}

fn params(months: u32) -> RobustnessParams {
    RobustnessParams {
        symbol: "BTCUSDT".into(),
        timeframe: Timeframe::H1,
        months,
        now: now(),
        initial_balance: 10_000.0,
        strategy: StrategyParams::default(),
    }
}

#[test]
fn three_months_fetched_once_oldest_first() {
    let provider = CountingProvider::new(None);
    let report = validate_robustness(&provider, &params(3), &SweepOptions::default(), None).unwrap();

    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    let months: Vec<&str> = report.windows.iter().map(|w| w.month.as_str()).collect();
    assert_eq!(months, vec!["2024-04", "2024-05", "2024-06"]);
    assert_eq!(report.evaluated_months, 3);
    assert_eq!(report.failed_months, 0);

    // Hourly candles: each window holds exactly its own month.
    assert_eq!(report.windows[0].candles, 30 * 24);
    assert_eq!(report.windows[1].candles, 31 * 24);
    assert_eq!(report.windows[2].candles, 30 * 24);
}

#[test]
fn aggregates_match_window_stats() {
    let provider = CountingProvider::new(None);
    let report = validate_robustness(&provider, &params(4), &SweepOptions::default(), None).unwrap();

    let profits: Vec<f64> = report
        .windows
        .iter()
        .map(|w| w.stats.unwrap().profit_percent)
        .collect();
    let mean = profits.iter().sum::<f64>() / profits.len() as f64;
    assert!((report.mean_profit_percent - mean).abs() < 1e-9);

    let profitable = profits.iter().filter(|&&p| p > 0.0).count();
    assert_eq!(report.profitable_months, profitable);
    assert!(
        (report.profitable_months_percent - profitable as f64 / 4.0 * 100.0).abs() < 1e-9
    );
    assert!(report.std_dev_profit_percent >= 0.0);
}

#[test]
fn windows_start_from_the_same_balance() {
    let provider = CountingProvider::new(None);
    let p = params(2);
    let candles = provider
        .fetch_candles(&p.symbol, p.timeframe, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(), now())
        .unwrap();
    let report = validate_on_candles(&candles, &p, &SweepOptions::default(), None).unwrap();

    // Each window's profit is relative to the fixed starting balance, so
    // rerunning the second window alone reproduces it.
    let mut single = p.clone();
    single.months = 1;
    let june_only = validate_on_candles(&candles, &single, &SweepOptions::default(), None).unwrap();
    assert_eq!(report.windows[1].stats, june_only.windows[0].stats);
}

#[test]
fn window_without_data_is_reported_and_excluded() {
    let provider = CountingProvider::new(Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()));
    let report = validate_robustness(&provider, &params(3), &SweepOptions::default(), None).unwrap();

    assert_eq!(report.windows.len(), 3);
    assert_eq!(report.failed_months, 1);
    assert_eq!(report.evaluated_months, 2);
    assert!(report.windows[0].stats.is_none());
    assert!(report.windows[0].error.is_some());
    assert_eq!(report.windows[0].candles, 0);
}

#[test]
fn every_window_failing_is_insufficient_data() {
    let provider = CountingProvider::new(Some(now()));
    let err = validate_robustness(&provider, &params(2), &SweepOptions::default(), None).unwrap_err();
    assert!(matches!(err, BacktestError::InsufficientData { available: 0, .. }));
}

#[test]
fn parallel_and_sequential_agree() {
    let provider = CountingProvider::new(None);
    let a = validate_robustness(&provider, &params(3), &SweepOptions::default(), None).unwrap();
    let b = validate_robustness(
        &provider,
        &params(3),
        &SweepOptions::default().with_parallelism(false),
        None,
    )
    .unwrap();
    assert_eq!(a, b);
}

#[test]
fn raised_cancel_flag_aborts() {
    let provider = CountingProvider::new(None);
    let flag = AtomicBool::new(true);
    let err = validate_robustness(&provider, &params(3), &SweepOptions::default(), Some(&flag))
        .unwrap_err();
    assert!(matches!(err, BacktestError::Cancelled));
}
