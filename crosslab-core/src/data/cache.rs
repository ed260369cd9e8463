//! Parquet candle cache with Hive-style partitioning.
//!
//! Layout: `{cache_dir}/symbol={SYMBOL}/timeframe={TF}/{year}.parquet`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Integrity validation on load (schema check, row count > 0)
//! - Quarantine for corrupt files ({filename}.quarantined)
//! - Metadata sidecar per (symbol, timeframe): range, count, BLAKE3 hash

use super::provider::DataError;
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Datelike, Utc};
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Metadata sidecar for one cached series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    pub symbol: String,
    pub timeframe: Timeframe,
    /// Open time of the first cached candle.
    pub first: DateTime<Utc>,
    /// Open time of the last cached candle.
    pub last: DateTime<Utc>,
    pub candle_count: usize,
    pub data_hash: String,
    pub cached_at: DateTime<Utc>,
}

impl CacheMeta {
    /// End of the interval covered by the last candle.
    pub fn covered_until(&self) -> DateTime<Utc> {
        self.last + self.timeframe.duration()
    }
}

pub struct ParquetCache {
    cache_dir: PathBuf,
}

impl ParquetCache {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// `{cache_dir}/symbol={SYMBOL}/timeframe={TF}/`
    fn series_dir(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.cache_dir
            .join(format!("symbol={}", symbol.to_ascii_uppercase()))
            .join(format!("timeframe={timeframe}"))
    }

    fn year_path(&self, symbol: &str, timeframe: Timeframe, year: i32) -> PathBuf {
        self.series_dir(symbol, timeframe)
            .join(format!("{year}.parquet"))
    }

    fn meta_path(&self, symbol: &str, timeframe: Timeframe) -> PathBuf {
        self.series_dir(symbol, timeframe).join("meta.json")
    }

    /// Replace the cached series with `candles` (already normalized, ascending).
    ///
    /// One Parquet file per calendar year.
    pub fn write(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<CacheMeta, DataError> {
        let (Some(first), Some(last)) = (candles.first(), candles.last()) else {
            return Err(DataError::CacheError("no candles to cache".into()));
        };

        let dir = self.series_dir(symbol, timeframe);
        fs::create_dir_all(&dir)
            .map_err(|e| DataError::CacheError(format!("failed to create dir: {e}")))?;

        let mut by_year: BTreeMap<i32, Vec<&Candle>> = BTreeMap::new();
        for c in candles {
            by_year.entry(c.timestamp.year()).or_default().push(c);
        }

        for (year, year_candles) in &by_year {
            let df = candles_to_dataframe(year_candles)?;
            let path = self.year_path(symbol, timeframe, *year);
            let tmp_path = path.with_extension("parquet.tmp");

            write_parquet(&df, &tmp_path)?;

            fs::rename(&tmp_path, &path).map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                DataError::CacheError(format!("atomic rename failed: {e}"))
            })?;
        }

        let meta = CacheMeta {
            symbol: symbol.to_ascii_uppercase(),
            timeframe,
            first: first.timestamp,
            last: last.timestamp,
            candle_count: candles.len(),
            data_hash: dataset_hash(candles),
            cached_at: Utc::now(),
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| DataError::CacheError(format!("meta serialization: {e}")))?;
        let meta_path = self.meta_path(symbol, timeframe);
        let meta_tmp = meta_path.with_extension("json.tmp");
        fs::write(&meta_tmp, meta_json)
            .and_then(|_| fs::rename(&meta_tmp, &meta_path))
            .map_err(|e| DataError::CacheError(format!("meta write: {e}")))?;

        tracing::debug!(
            symbol = %meta.symbol,
            %timeframe,
            candles = meta.candle_count,
            years = by_year.len(),
            "cache written"
        );
        Ok(meta)
    }

    /// Load the whole cached series, ascending.
    pub fn load(&self, symbol: &str, timeframe: Timeframe) -> Result<Vec<Candle>, DataError> {
        let dir = self.series_dir(symbol, timeframe);
        let no_data = || DataError::NoCachedData {
            symbol: symbol.to_ascii_uppercase(),
            timeframe,
        };
        if !dir.exists() {
            return Err(no_data());
        }

        let entries =
            fs::read_dir(&dir).map_err(|e| DataError::CacheError(format!("read dir: {e}")))?;

        let mut all = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| DataError::CacheError(format!("dir entry: {e}")))?;
            let path = entry.path();

            if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
                continue;
            }

            match load_and_validate_parquet(&path) {
                Ok(candles) => all.extend(candles),
                Err(e) => {
                    let quarantine = path.with_extension("parquet.quarantined");
                    tracing::warn!(file = %path.display(), error = %e, "quarantining corrupt cache file");
                    let _ = fs::rename(&path, &quarantine);
                }
            }
        }

        if all.is_empty() {
            return Err(no_data());
        }

        all.sort_by_key(|c| c.timestamp);
        Ok(all)
    }

    /// Cached candles in `[start, end)`.
    pub fn load_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        let mut candles = self.load(symbol, timeframe)?;
        candles.retain(|c| c.timestamp >= start && c.timestamp < end);
        Ok(candles)
    }

    pub fn get_meta(&self, symbol: &str, timeframe: Timeframe) -> Option<CacheMeta> {
        let content = fs::read_to_string(self.meta_path(symbol, timeframe)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Cache status for each symbol at one timeframe.
    pub fn status(&self, symbols: &[&str], timeframe: Timeframe) -> Vec<CacheStatus> {
        symbols
            .iter()
            .map(|sym| {
                let meta = self.get_meta(sym, timeframe);
                CacheStatus {
                    symbol: sym.to_ascii_uppercase(),
                    timeframe,
                    cached: meta.is_some(),
                    first: meta.as_ref().map(|m| m.first),
                    last: meta.as_ref().map(|m| m.last),
                    candle_count: meta.as_ref().map(|m| m.candle_count),
                }
            })
            .collect()
    }

    /// How well the cache covers `[start, end)`.
    pub fn covers_range(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> CoverageResult {
        match self.get_meta(symbol, timeframe) {
            None => CoverageResult::NotCached,
            Some(meta) => {
                if meta.first <= start && meta.covered_until() >= end {
                    CoverageResult::FullyCovered
                } else {
                    CoverageResult::PartiallyCovered {
                        cached_first: meta.first,
                        cached_until: meta.covered_until(),
                    }
                }
            }
        }
    }
}

/// Cache status for a single series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub cached: bool,
    pub first: Option<DateTime<Utc>>,
    pub last: Option<DateTime<Utc>>,
    pub candle_count: Option<usize>,
}

/// How well the cache covers a requested range.
#[derive(Debug, Clone, PartialEq)]
pub enum CoverageResult {
    NotCached,
    FullyCovered,
    PartiallyCovered {
        cached_first: DateTime<Utc>,
        cached_until: DateTime<Utc>,
    },
}

/// BLAKE3 hex digest over the raw timestamp and OHLCV bits of each candle.
pub fn dataset_hash(candles: &[Candle]) -> String {
    let mut hasher = blake3::Hasher::new();
    for c in candles {
        hasher.update(&c.timestamp_millis().to_le_bytes());
        for v in [c.open, c.high, c.low, c.close, c.volume] {
            hasher.update(&v.to_bits().to_le_bytes());
        }
    }
    hasher.finalize().to_hex().to_string()
}

// ── Parquet I/O helpers ─────────────────────────────────────────────

const COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

fn candles_to_dataframe(candles: &[&Candle]) -> Result<DataFrame, DataError> {
    let timestamps: Vec<i64> = candles.iter().map(|c| c.timestamp_millis()).collect();
    let opens: Vec<f64> = candles.iter().map(|c| c.open).collect();
    let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
    let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

    DataFrame::new(vec![
        Column::new("timestamp".into(), timestamps),
        Column::new("open".into(), opens),
        Column::new("high".into(), highs),
        Column::new("low".into(), lows),
        Column::new("close".into(), closes),
        Column::new("volume".into(), volumes),
    ])
    .map_err(|e| DataError::ParquetError(format!("dataframe creation: {e}")))
}

fn write_parquet(df: &DataFrame, path: &Path) -> Result<(), DataError> {
    let file =
        fs::File::create(path).map_err(|e| DataError::ParquetError(format!("create file: {e}")))?;
    ParquetWriter::new(file)
        .finish(&mut df.clone())
        .map_err(|e| DataError::ParquetError(format!("write parquet: {e}")))?;
    Ok(())
}

fn load_and_validate_parquet(path: &Path) -> Result<Vec<Candle>, DataError> {
    let file = fs::File::open(path).map_err(|e| DataError::ParquetError(format!("open: {e}")))?;
    let df = ParquetReader::new(file)
        .finish()
        .map_err(|e| DataError::ParquetError(format!("read: {e}")))?;

    if df.height() == 0 {
        return Err(DataError::ValidationError("empty parquet file".into()));
    }
    for col_name in COLUMNS {
        if df.column(col_name).is_err() {
            return Err(DataError::ValidationError(format!(
                "missing column '{col_name}'"
            )));
        }
    }

    dataframe_to_candles(&df)
}

fn dataframe_to_candles(df: &DataFrame) -> Result<Vec<Candle>, DataError> {
    let col_err = |name: &str, e: PolarsError| DataError::ParquetError(format!("{name} column: {e}"));
    let f64_col = |name: &str| -> Result<Float64Chunked, DataError> {
        df.column(name)
            .and_then(|c| c.f64().cloned())
            .map_err(|e| col_err(name, e))
    };

    let ts_ca = df
        .column("timestamp")
        .and_then(|c| c.i64().cloned())
        .map_err(|e| col_err("timestamp", e))?;
    let open_ca = f64_col("open")?;
    let high_ca = f64_col("high")?;
    let low_ca = f64_col("low")?;
    let close_ca = f64_col("close")?;
    let vol_ca = f64_col("volume")?;

    let n = df.height();
    let mut candles = Vec::with_capacity(n);
    for i in 0..n {
        let ms = ts_ca
            .get(i)
            .ok_or_else(|| DataError::ParquetError(format!("null timestamp at row {i}")))?;
        let timestamp = DateTime::from_timestamp_millis(ms)
            .ok_or_else(|| DataError::ParquetError(format!("timestamp out of range at row {i}")))?;

        candles.push(Candle {
            timestamp,
            open: open_ca.get(i).unwrap_or(f64::NAN),
            high: high_ca.get(i).unwrap_or(f64::NAN),
            low: low_ca.get(i).unwrap_or(f64::NAN),
            close: close_ca.get(i).unwrap_or(f64::NAN),
            volume: vol_ca.get(i).unwrap_or(f64::NAN),
        });
    }

    Ok(candles)
}
