//! CSV candle import.
//!
//! Reads `{dir}/{SYMBOL}_{timeframe}.csv` with header
//! `timestamp,open,high,low,close,volume`. Timestamps may be epoch
//! milliseconds or RFC 3339. Rows may be in any order; they are normalized
//! before range filtering.

use super::ingest;
use super::provider::{check_range, CandleProvider, DataError};
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

pub struct CsvProvider {
    dir: PathBuf,
}

impl CsvProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.dir
            .join(format!("{}_{}.csv", symbol.to_ascii_uppercase(), timeframe))
    }
}

impl CandleProvider for CsvProvider {
    fn name(&self) -> &str {
        "csv"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        check_range(start, end)?;
        let path = self.file_path(symbol, timeframe);
        if !path.exists() {
            return Err(DataError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }
        let (mut candles, report) = ingest::normalize(read_candles_csv(&path)?)?;
        if report.reordered || report.duplicates_removed > 0 || report.invalid_removed > 0 {
            tracing::warn!(
                path = %path.display(),
                reordered = report.reordered,
                duplicates = report.duplicates_removed,
                invalid = report.invalid_removed,
                "csv rows normalized"
            );
        }
        candles.retain(|c| c.timestamp >= start && c.timestamp < end);
        Ok(candles)
    }

    fn is_available(&self) -> bool {
        self.dir.is_dir()
    }
}

/// Read every row of a candle CSV file.
pub fn read_candles_csv(path: &Path) -> Result<Vec<Candle>, DataError> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| DataError::CsvError(format!("{}: {e}", path.display())))?;

    let mut candles = Vec::new();
    for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
        let row = row.map_err(|e| DataError::CsvError(format!("row {}: {e}", line + 1)))?;
        candles.push(Candle {
            timestamp: parse_timestamp(&row.timestamp)?,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    Ok(candles)
}

/// Write candles in the same layout `read_candles_csv` accepts (epoch milliseconds).
pub fn write_candles_csv(path: &Path, candles: &[Candle]) -> Result<(), DataError> {
    let mut writer = csv::Writer::from_path(path)
        .map_err(|e| DataError::CsvError(format!("{}: {e}", path.display())))?;
    writer
        .write_record(["timestamp", "open", "high", "low", "close", "volume"])
        .map_err(|e| DataError::CsvError(e.to_string()))?;
    for c in candles {
        writer
            .write_record([
                c.timestamp_millis().to_string(),
                c.open.to_string(),
                c.high.to_string(),
                c.low.to_string(),
                c.close.to_string(),
                c.volume.to_string(),
            ])
            .map_err(|e| DataError::CsvError(e.to_string()))?;
    }
    writer.flush().map_err(|e| DataError::CsvError(e.to_string()))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DataError> {
    let raw = raw.trim();
    if let Ok(ms) = raw.parse::<i64>() {
        return DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::CsvError(format!("timestamp out of range: {ms}")));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DataError::CsvError(format!("bad timestamp '{raw}': {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::fs;

    #[test]
    fn reads_both_timestamp_forms_and_filters_range() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("BTCUSDT_1h.csv"),
            "timestamp,open,high,low,close,volume\n\
             1704067200000,100,101,99,100.5,10\n\
             2024-01-01T01:00:00Z,100.5,102,100,101,12\n\
             2024-01-01T02:00:00+00:00,101,103,100,102,8\n",
        )
        .unwrap();

        let provider = CsvProvider::new(dir.path());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap();
        let candles = provider
            .fetch_candles("btcusdt", Timeframe::H1, start, end)
            .unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, start);
        assert_eq!(candles[1].close, 101.0);
    }

    #[test]
    fn unordered_rows_with_duplicates_come_back_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("BTCUSDT_1h.csv");
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut candles: Vec<Candle> = (0..48)
            .map(|h| {
                let close = 100.0 + h as f64;
                Candle {
                    timestamp: start + chrono::Duration::hours(h),
                    open: close,
                    high: close + 1.0,
                    low: close - 1.0,
                    close,
                    volume: 5.0,
                }
            })
            .collect();
        candles.reverse();
        let mut revised = candles[10];
        revised.close = revised.open + 0.5;
        candles.push(revised);
        write_candles_csv(&path, &candles).unwrap();

        let provider = CsvProvider::new(dir.path());
        let out = provider
            .fetch_candles("BTCUSDT", Timeframe::H1, start, start + chrono::Duration::days(2))
            .unwrap();

        assert_eq!(out.len(), 48);
        assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        // The later row for a timestamp wins.
        assert_eq!(out[37], revised);
    }

    #[test]
    fn missing_file_is_symbol_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let provider = CsvProvider::new(dir.path());
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let result = provider.fetch_candles("NOPE", Timeframe::D1, start, start + chrono::Duration::days(1));
        assert!(matches!(result, Err(DataError::SymbolNotFound { .. })));
    }

    #[test]
    fn written_file_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ETHUSDT_1d.csv");
        let candle = Candle {
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            open: 3000.0,
            high: 3100.0,
            low: 2950.0,
            close: 3050.5,
            volume: 1234.5,
        };
        write_candles_csv(&path, &[candle]).unwrap();
        assert_eq!(read_candles_csv(&path).unwrap(), vec![candle]);
    }

    #[test]
    fn malformed_row_reports_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("X_1h.csv");
        fs::write(&path, "timestamp,open,high,low,close,volume\n1,a,1,1,1,1\n").unwrap();
        let err = read_candles_csv(&path).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }
}
