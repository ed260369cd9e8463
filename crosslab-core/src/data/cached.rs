//! Cache-backed provider: serves from Parquet when it can, fetches the gaps when it can't.

use super::cache::{CoverageResult, ParquetCache};
use super::ingest;
use super::provider::{check_range, CandleProvider, DataError};
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};

pub struct CachedProvider<P> {
    inner: P,
    cache: ParquetCache,
    /// Skip the cache read and always refetch the whole range.
    force_refresh: bool,
    /// Current time, for telling closed candles from the forming one.
    clock: fn() -> DateTime<Utc>,
}

impl<P: CandleProvider> CachedProvider<P> {
    pub fn new(inner: P, cache: ParquetCache) -> Self {
        Self {
            inner,
            cache,
            force_refresh: false,
            clock: Utc::now,
        }
    }

    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_force_refresh(mut self, force: bool) -> Self {
        self.force_refresh = force;
        self
    }

    pub fn cache(&self) -> &ParquetCache {
        &self.cache
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Ranges of `[start, end)` not covered by the cache.
    fn missing_ranges(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
        if self.force_refresh {
            return vec![(start, end)];
        }
        match self.cache.covers_range(symbol, timeframe, start, end) {
            CoverageResult::FullyCovered => Vec::new(),
            CoverageResult::NotCached => vec![(start, end)],
            CoverageResult::PartiallyCovered {
                cached_first,
                cached_until,
            } => {
                // A request entirely outside the cached span is fetched in one piece.
                if end <= cached_first || start >= cached_until {
                    return vec![(start, end)];
                }
                let mut gaps = Vec::new();
                if start < cached_first {
                    gaps.push((start, cached_first));
                }
                if end > cached_until {
                    gaps.push((cached_until, end));
                }
                gaps
            }
        }
    }
}

impl<P: CandleProvider> CandleProvider for CachedProvider<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        check_range(start, end)?;

        let gaps = self.missing_ranges(symbol, timeframe, start, end);
        if gaps.is_empty() {
            tracing::debug!(symbol, %timeframe, "cache hit");
            return self.cache.load_range(symbol, timeframe, start, end);
        }

        let mut merged = if self.force_refresh {
            Vec::new()
        } else {
            match self.cache.load(symbol, timeframe) {
                Ok(cached) => cached,
                Err(DataError::NoCachedData { .. }) => Vec::new(),
                Err(e) => return Err(e),
            }
        };

        let mut fetched_any = false;
        for (gap_start, gap_end) in gaps {
            tracing::info!(
                symbol,
                %timeframe,
                from = %gap_start,
                to = %gap_end,
                provider = self.inner.name(),
                "fetching uncached range"
            );
            match self.inner.fetch_candles(symbol, timeframe, gap_start, gap_end) {
                Ok(fresh) => {
                    fetched_any |= !fresh.is_empty();
                    merged.extend(fresh);
                }
                Err(e) => return Err(e),
            }
        }

        if merged.is_empty() {
            tracing::debug!(symbol, %timeframe, %start, %end, "no candles in range");
            return Ok(Vec::new());
        }

        let (normalized, report) = ingest::normalize(merged)?;
        if fetched_any {
            // Only closed candles are cached, so the forming one is refetched next time.
            let mut closed = normalized.clone();
            let forming = ingest::drop_unclosed(&mut closed, timeframe, (self.clock)());
            if !closed.is_empty() {
                self.cache.write(symbol, timeframe, &closed)?;
                tracing::debug!(symbol, kept = closed.len(), forming, received = report.received, "cache updated");
            }
        }

        Ok(normalized
            .into_iter()
            .filter(|c| c.timestamp >= start && c.timestamp < end)
            .collect())
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }
}
