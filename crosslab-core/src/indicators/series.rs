//! Offset-aware indicator series.

use serde::{Deserialize, Serialize};

/// Indicator values aligned to a suffix of the candle sequence.
///
/// `values[k]` belongs to candle `offset + k`. Candles before `offset` are in
/// warm-up and have no value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    values: Vec<f64>,
    offset: usize,
}

impl IndicatorSeries {
    pub fn new(values: Vec<f64>, offset: usize) -> Self {
        Self { values, offset }
    }

    /// Value at absolute candle index `bar`, or `None` during warm-up or past the end.
    #[inline]
    pub fn at(&self, bar: usize) -> Option<f64> {
        bar.checked_sub(self.offset)
            .and_then(|k| self.values.get(k))
            .copied()
    }

    /// Index of the first candle that has a value.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value at the last candle the series covers.
    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    /// Number of candles the series spans, warm-up included.
    pub fn span(&self) -> usize {
        self.offset + self.values.len()
    }
}
