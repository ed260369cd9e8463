//! Artifact export: result.json, trades.csv, equity.csv, and report JSON.

use chrono::{Duration, TimeZone, Utc};
use crosslab_core::data::SyntheticProvider;
use crosslab_core::domain::Timeframe;
use crosslab_runner::export::{import_json, load_artifacts, ExportError};
use crosslab_runner::{
    run_backtest, save_artifacts, save_json, BacktestParams, BacktestResult, StrategyParams,
};

fn sample_result() -> BacktestResult {
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    let params = BacktestParams {
        symbol: "BTCUSDT".into(),
        timeframe: Timeframe::M30,
        start,
        end: start + Duration::days(30),
        initial_balance: 10_000.0,
        strategy: StrategyParams::default(),
    };
    run_backtest(&SyntheticProvider::new().with_max_step(0.03), &params).unwrap()
}

#[test]
fn artifact_bundle_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let result = sample_result();
    let paths = save_artifacts(&result, &dir.path().join("run")).unwrap();

    assert!(paths.result_json.exists());
    let trades = std::fs::read_to_string(&paths.trades_csv).unwrap();
    assert_eq!(trades.lines().count(), result.trades.len() + 1);
    assert!(trades.starts_with("side,entry_time,entry_price"));

    let equity = std::fs::read_to_string(&paths.equity_csv).unwrap();
    assert_eq!(equity.lines().count(), result.equity_curve.len() + 1);
    assert!(equity.starts_with("timestamp,equity,max_drawdown"));
}

#[test]
fn saved_result_loads_back() {
    let dir = tempfile::tempdir().unwrap();
    let result = sample_result();
    save_artifacts(&result, dir.path()).unwrap();
    let loaded = load_artifacts(dir.path()).unwrap();
    assert_eq!(loaded.schema_version, result.schema_version);
    assert_eq!(loaded.trades.len(), result.trades.len());
    assert_eq!(loaded.dataset_hash, result.dataset_hash);
    assert_eq!(loaded.monthly_returns.keys().collect::<Vec<_>>(), result.monthly_returns.keys().collect::<Vec<_>>());
}

#[test]
fn newer_schema_is_rejected() {
    let mut value = serde_json::to_value(sample_result()).unwrap();
    value["schema_version"] = serde_json::json!(99);
    let err = import_json(&value.to_string()).unwrap_err();
    assert!(matches!(err, ExportError::UnsupportedSchema { found: 99, .. }));
}

#[test]
fn missing_schema_version_defaults_to_current() {
    let mut value = serde_json::to_value(sample_result()).unwrap();
    value.as_object_mut().unwrap().remove("schema_version");
    let loaded = import_json(&value.to_string()).unwrap();
    assert_eq!(loaded.schema_version, crosslab_runner::runner::SCHEMA_VERSION);
}

#[test]
fn save_json_creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reports/nested/screen.json");
    save_json(&vec!["BTCUSDT", "ETHUSDT"], &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    let back: Vec<String> = serde_json::from_str(&text).unwrap();
    assert_eq!(back, vec!["BTCUSDT", "ETHUSDT"]);
}

#[test]
fn load_from_empty_dir_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(load_artifacts(dir.path()), Err(ExportError::Io { .. })));
}
