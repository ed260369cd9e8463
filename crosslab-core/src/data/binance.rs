//! Binance spot klines provider.
//!
//! Pages through `GET /api/v3/klines` (1000 candles per request), with
//! exponential-backoff retries on rate limits and server errors, and the
//! circuit breaker in front of every request.

use super::circuit_breaker::CircuitBreaker;
use super::provider::{check_range, CandleProvider, DataError};
use crate::domain::{Candle, Timeframe};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Largest page the klines endpoint serves.
pub const MAX_PAGE: usize = 1000;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Error body returned with 4xx responses.
#[derive(Debug, Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Binance symbol-not-found error code.
const INVALID_SYMBOL: i64 = -1121;

pub struct BinanceProvider {
    client: reqwest::blocking::Client,
    circuit_breaker: Arc<CircuitBreaker>,
    base_url: String,
    page_limit: usize,
    max_retries: u32,
    base_delay: Duration,
}

impl BinanceProvider {
    pub fn new(circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("crosslab/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DataError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            circuit_breaker,
            base_url: DEFAULT_BASE_URL.to_string(),
            page_limit: MAX_PAGE,
            max_retries: 3,
            base_delay: Duration::from_millis(500),
        })
    }

    /// Point at a different host (testnet, mirror).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn klines_url(&self, symbol: &str, timeframe: Timeframe, start_ms: i64, end_ms: i64) -> String {
        format!(
            "{}/api/v3/klines?symbol={symbol}&interval={}&startTime={start_ms}&endTime={end_ms}&limit={}",
            self.base_url,
            timeframe.as_str(),
            self.page_limit
        )
    }

    /// Fetch one page with retry and circuit breaker logic.
    fn fetch_page(&self, symbol: &str, url: &str) -> Result<Vec<Candle>, DataError> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                tracing::debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying klines request");
                std::thread::sleep(delay);
            }

            if !self.circuit_breaker.is_allowed() {
                return Err(DataError::CircuitBreakerTripped);
            }

            let resp = match self.client.get(url).send() {
                Ok(resp) => resp,
                Err(e) if e.is_connect() || e.is_timeout() => {
                    self.circuit_breaker.record_failure();
                    last_error = Some(DataError::NetworkUnreachable(e.to_string()));
                    continue;
                }
                Err(e) => return Err(DataError::NetworkUnreachable(e.to_string())),
            };

            let status = resp.status();

            // 418 is Binance's auto-ban after ignoring 429s; 403 is the WAF.
            if status == reqwest::StatusCode::FORBIDDEN || status.as_u16() == 418 {
                tracing::warn!(symbol, %status, "exchange refused requests, opening circuit breaker");
                self.circuit_breaker.trip();
                return Err(DataError::CircuitBreakerTripped);
            }

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                self.circuit_breaker.record_failure();
                let retry_after = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(60);
                last_error = Some(DataError::RateLimited {
                    retry_after_secs: retry_after,
                });
                continue;
            }

            if status.is_client_error() {
                let body: Option<ApiError> = resp.json().ok();
                return Err(match body {
                    Some(err) if err.code == INVALID_SYMBOL => DataError::SymbolNotFound {
                        symbol: symbol.to_string(),
                    },
                    Some(err) => DataError::Other(format!("HTTP {status}: {} ({})", err.msg, err.code)),
                    None => DataError::Other(format!("HTTP {status} for {symbol}")),
                });
            }

            if !status.is_success() {
                self.circuit_breaker.record_failure();
                last_error = Some(DataError::Other(format!("HTTP {status} for {symbol}")));
                continue;
            }

            let rows: Vec<Vec<Value>> = resp.json().map_err(|e| {
                DataError::ResponseFormatChanged(format!("failed to parse klines for {symbol}: {e}"))
            })?;
            let candles = rows
                .iter()
                .map(|row| parse_kline(row))
                .collect::<Result<Vec<_>, _>>()?;

            self.circuit_breaker.record_success();
            return Ok(candles);
        }

        Err(last_error.unwrap_or_else(|| DataError::Other("max retries exceeded".into())))
    }
}

impl CandleProvider for BinanceProvider {
    fn name(&self) -> &str {
        "binance"
    }

    fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Candle>, DataError> {
        check_range(start, end)?;
        let symbol = symbol.to_ascii_uppercase();
        // endTime is inclusive on the exchange side.
        let end_ms = end.timestamp_millis() - 1;

        let mut candles = collect_pages(
            start.timestamp_millis(),
            end_ms,
            timeframe.duration().num_milliseconds(),
            self.page_limit,
            |cursor| {
                let url = self.klines_url(&symbol, timeframe, cursor, end_ms);
                let page = self.fetch_page(&symbol, &url)?;
                tracing::debug!(symbol = %symbol, %timeframe, rows = page.len(), "klines page");
                Ok(page)
            },
        )?;

        if candles.is_empty() {
            tracing::debug!(symbol = %symbol, %timeframe, %start, %end, "no klines in range");
        }
        candles.retain(|c| c.timestamp >= start && c.timestamp < end);
        Ok(candles)
    }

    fn is_available(&self) -> bool {
        self.circuit_breaker.is_allowed()
    }
}

/// Walk `[start_ms, end_ms]` page by page; each page starts one step after
/// the previous page's last open time.
///
/// An empty range yields an empty series. Unknown symbols fail inside
/// `fetch_page` with the exchange's own error code.
fn collect_pages<F>(
    start_ms: i64,
    end_ms: i64,
    step_ms: i64,
    page_limit: usize,
    mut fetch_page: F,
) -> Result<Vec<Candle>, DataError>
where
    F: FnMut(i64) -> Result<Vec<Candle>, DataError>,
{
    let mut candles = Vec::new();
    let mut cursor = start_ms;

    while cursor <= end_ms {
        let page = fetch_page(cursor)?;
        let Some(last) = page.last() else {
            break;
        };

        let next = last.timestamp_millis() + step_ms;
        let full_page = page.len() >= page_limit;
        candles.extend(page);

        if !full_page || next <= cursor {
            break;
        }
        cursor = next;
    }
    Ok(candles)
}

/// Parse one kline row: `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.
pub fn parse_kline(row: &[Value]) -> Result<Candle, DataError> {
    if row.len() < 6 {
        return Err(DataError::ResponseFormatChanged(format!(
            "kline row has {} fields, expected at least 6",
            row.len()
        )));
    }

    let open_ms = row[0]
        .as_i64()
        .ok_or_else(|| DataError::ResponseFormatChanged("kline open time is not an integer".into()))?;
    let timestamp = DateTime::from_timestamp_millis(open_ms)
        .ok_or_else(|| DataError::ResponseFormatChanged(format!("invalid open time: {open_ms}")))?;

    let num = |idx: usize, field: &str| -> Result<f64, DataError> {
        match &row[idx] {
            Value::String(s) => s.parse::<f64>().map_err(|e| {
                DataError::ResponseFormatChanged(format!("kline {field} '{s}': {e}"))
            }),
            Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| DataError::ResponseFormatChanged(format!("kline {field} out of range"))),
            other => Err(DataError::ResponseFormatChanged(format!(
                "kline {field} has unexpected type: {other}"
            ))),
        }
    };

    Ok(Candle {
        timestamp,
        open: num(1, "open")?,
        high: num(2, "high")?,
        low: num(3, "low")?,
        close: num(4, "close")?,
        volume: num(5, "volume")?,
    })
}
