//! Artifact export: JSON and CSV files for a backtest run and JSON for
//! sweep, validation, and screening reports.
//!
//! `result.json` carries a `schema_version`; newer versions are rejected on load.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

use crosslab_core::domain::Trade;
use crosslab_core::engine::EquityPoint;

use crate::runner::{BacktestResult, SCHEMA_VERSION};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("unsupported schema version {found} (max supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },
}

/// Paths written by [`save_artifacts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub result_json: PathBuf,
    pub trades_csv: PathBuf,
    pub equity_csv: PathBuf,
}

// ─── JSON ───────────────────────────────────────────────────────────

/// Deserialize a `BacktestResult`, rejecting unknown schema versions.
pub fn import_json(json: &str) -> Result<BacktestResult, ExportError> {
    let result: BacktestResult = serde_json::from_str(json)?;
    if result.schema_version > SCHEMA_VERSION {
        return Err(ExportError::UnsupportedSchema {
            found: result.schema_version,
            supported: SCHEMA_VERSION,
        });
    }
    Ok(result)
}

/// Write any serializable report as pretty JSON, creating parent directories.
pub fn save_json<T: Serialize + ?Sized>(value: &T, path: &Path) -> Result<(), ExportError> {
    let json = serde_json::to_string_pretty(value)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ExportError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    write_file(path, json.as_bytes())
}

// ─── CSV ────────────────────────────────────────────────────────────

/// Trade tape. One row per completed trade, in exit order.
pub fn export_trades_csv(trades: &[Trade]) -> Result<Vec<u8>, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record([
        "side",
        "entry_time",
        "entry_price",
        "exit_time",
        "exit_price",
        "exit_reason",
        "size",
        "profit",
        "profit_pct",
        "duration_hours",
    ])?;
    for t in trades {
        let row: [&str; 10] = [
            t.side.as_str(),
            &t.entry_time.to_rfc3339(),
            &format!("{:.8}", t.entry_price),
            &t.exit_time.to_rfc3339(),
            &format!("{:.8}", t.exit_price),
            t.exit_reason.as_str(),
            &format!("{:.8}", t.size),
            &format!("{:.4}", t.profit),
            &format!("{:.4}", t.profit_pct),
            &format!("{:.2}", t.duration_hours),
        ];
        wtr.write_record(row)?;
    }
    wtr.into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))
}

/// Equity curve, one row per sample.
pub fn export_equity_csv(equity_curve: &[EquityPoint]) -> Result<Vec<u8>, ExportError> {
    let mut wtr = csv::Writer::from_writer(vec![]);
    wtr.write_record(["timestamp", "equity", "max_drawdown"])?;
    for p in equity_curve {
        wtr.write_record([
            p.timestamp.to_rfc3339(),
            format!("{:.4}", p.equity),
            format!("{:.4}", p.max_drawdown),
        ])?;
    }
    wtr.into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))
}

// ─── Artifact bundle ────────────────────────────────────────────────

/// Write `result.json`, `trades.csv`, and `equity.csv` into `dir`.
pub fn save_artifacts(result: &BacktestResult, dir: &Path) -> Result<ArtifactPaths, ExportError> {
    fs::create_dir_all(dir).map_err(|source| ExportError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let paths = ArtifactPaths {
        result_json: dir.join("result.json"),
        trades_csv: dir.join("trades.csv"),
        equity_csv: dir.join("equity.csv"),
    };
    save_json(result, &paths.result_json)?;
    write_file(&paths.trades_csv, &export_trades_csv(&result.trades)?)?;
    write_file(&paths.equity_csv, &export_equity_csv(&result.equity_curve)?)?;

    tracing::info!(dir = %dir.display(), trades = result.trades.len(), "artifacts saved");
    Ok(paths)
}

/// Load `result.json` from an artifact directory.
pub fn load_artifacts(dir: &Path) -> Result<BacktestResult, ExportError> {
    let path = dir.join("result.json");
    let json = fs::read_to_string(&path).map_err(|source| ExportError::Io { path, source })?;
    import_json(&json)
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), ExportError> {
    fs::write(path, bytes).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })
}
