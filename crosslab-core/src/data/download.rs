//! Download orchestrator: multi-symbol cache warm-up with progress reporting.

use super::cache::{CoverageResult, ParquetCache};
use super::ingest;
use super::provider::{CandleProvider, DataError};
use crate::domain::Timeframe;
use chrono::{DateTime, Utc};

/// Progress callback for multi-symbol operations.
pub trait DownloadProgress: Send {
    fn on_start(&self, symbol: &str, index: usize, total: usize);

    fn on_complete(&self, symbol: &str, index: usize, total: usize, result: &Result<usize, DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Progress reporter that prints to stdout.
pub struct StdoutProgress;

impl DownloadProgress for StdoutProgress {
    fn on_start(&self, symbol: &str, index: usize, total: usize) {
        println!("[{}/{}] Fetching {symbol}...", index + 1, total);
    }

    fn on_complete(&self, symbol: &str, _index: usize, _total: usize, result: &Result<usize, DataError>) {
        match result {
            Ok(n) => println!("  OK: {symbol} ({n} candles)"),
            Err(e) => println!("  FAIL: {symbol}: {e}"),
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        println!("\nDownload complete: {succeeded}/{total} succeeded, {failed} failed");
    }
}

/// Summary of a batch download.
#[derive(Debug)]
pub struct DownloadSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<(String, DataError)>,
}

impl DownloadSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }
}

/// Fetch → ingest → cache for each symbol. Already-covered symbols are skipped unless `force`.
#[allow(clippy::too_many_arguments)]
pub fn download_symbols(
    provider: &dyn CandleProvider,
    cache: &ParquetCache,
    symbols: &[&str],
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    force: bool,
    progress: &dyn DownloadProgress,
) -> DownloadSummary {
    let total = symbols.len();
    let mut succeeded = 0;
    let mut failed = 0;
    let mut errors: Vec<(String, DataError)> = Vec::new();

    for (i, symbol) in symbols.iter().enumerate() {
        progress.on_start(symbol, i, total);

        if !force && cache.covers_range(symbol, timeframe, start, end) == CoverageResult::FullyCovered {
            let count = cache
                .get_meta(symbol, timeframe)
                .map(|m| m.candle_count)
                .unwrap_or(0);
            progress.on_complete(symbol, i, total, &Ok(count));
            succeeded += 1;
            continue;
        }

        let result = download_single(provider, cache, symbol, timeframe, start, end);
        progress.on_complete(symbol, i, total, &result);

        match result {
            Ok(_) => succeeded += 1,
            Err(e) => {
                tracing::warn!(symbol, error = %e, "download failed");
                errors.push((symbol.to_string(), e));
                failed += 1;
            }
        }

        if !provider.is_available() {
            for sym in &symbols[(i + 1)..total] {
                errors.push((sym.to_string(), DataError::CircuitBreakerTripped));
                failed += 1;
            }
            break;
        }
    }

    progress.on_batch_complete(succeeded, failed, total);

    DownloadSummary {
        total,
        succeeded,
        failed,
        errors,
    }
}

fn download_single(
    provider: &dyn CandleProvider,
    cache: &ParquetCache,
    symbol: &str,
    timeframe: Timeframe,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<usize, DataError> {
    let fetched = provider.fetch_candles(symbol, timeframe, start, end)?;
    let (mut candles, _) = ingest::normalize(fetched)?;
    let forming = ingest::drop_unclosed(&mut candles, timeframe, Utc::now());
    if candles.is_empty() {
        return Err(DataError::ValidationError(format!(
            "no closed candles for {symbol} in range"
        )));
    }
    if forming > 0 {
        tracing::debug!(symbol, forming, "skipped forming candle");
    }
    cache.write(symbol, timeframe, &candles)?;
    Ok(candles.len())
}
