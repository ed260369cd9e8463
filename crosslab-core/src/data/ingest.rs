//! Normalization of fetched candles before they are cached or simulated.

use super::provider::DataError;
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the ingest step changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub received: usize,
    pub kept: usize,
    pub duplicates_removed: usize,
    pub invalid_removed: usize,
    /// Input arrived out of timestamp order.
    pub reordered: bool,
}

/// Sort ascending, drop duplicate timestamps (last occurrence wins), drop insane candles.
///
/// Fails if nothing survives.
pub fn normalize(mut candles: Vec<Candle>) -> Result<(Vec<Candle>, IngestReport), DataError> {
    let received = candles.len();
    let reordered = candles
        .windows(2)
        .any(|w| w[0].timestamp > w[1].timestamp);

    // Stable sort keeps arrival order among equal timestamps.
    candles.sort_by_key(|c| c.timestamp);

    let mut deduped: Vec<Candle> = Vec::with_capacity(candles.len());
    let mut duplicates_removed = 0;
    for c in candles {
        match deduped.last_mut() {
            Some(prev) if prev.timestamp == c.timestamp => {
                *prev = c;
                duplicates_removed += 1;
            }
            _ => deduped.push(c),
        }
    }

    let before = deduped.len();
    deduped.retain(Candle::is_sane);
    let invalid_removed = before - deduped.len();

    if deduped.is_empty() {
        return Err(DataError::ValidationError(format!(
            "no valid candles out of {received}"
        )));
    }

    if invalid_removed > 0 || duplicates_removed > 0 {
        tracing::debug!(received, invalid_removed, duplicates_removed, "ingest dropped candles");
    }

    let report = IngestReport {
        received,
        kept: deduped.len(),
        duplicates_removed,
        invalid_removed,
        reordered,
    };
    Ok((deduped, report))
}

/// Drop candles whose interval has not ended by `now`. Returns how many were dropped.
///
/// Exchanges serve the still-forming candle with provisional OHLC values; it
/// must not be stored as final.
pub fn drop_unclosed(candles: &mut Vec<Candle>, timeframe: Timeframe, now: DateTime<Utc>) -> usize {
    let before = candles.len();
    let step = timeframe.duration();
    candles.retain(|c| c.timestamp + step <= now);
    before - candles.len()
}
