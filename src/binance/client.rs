// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// Only unauthenticated endpoints are used: the pipeline never trades, it just
// needs the most recent klines to seed the series buffer.
// =============================================================================

use anyhow::{Context, Result};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::market_data::Bar;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Binance REST client for public market data.
#[derive(Debug, Clone)]
pub struct BinanceClient {
    base_url: String,
    client: reqwest::Client,
}

impl BinanceClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Point the client at another host (testnet, local mirror).
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.into();
        debug!(base_url = %base_url, "BinanceClient initialised");

        Ok(Self { base_url, client })
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines (public — no signature required).
    ///
    /// Returns bars oldest first. A bar whose close time is still in the
    /// future is marked as in progress.
    ///
    /// Array indices:
    ///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume,
    ///   [6] closeTime, [7] quoteAssetVolume, [8] numberOfTrades, ...
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(&self, symbol: &str, interval: &str, limit: usize) -> Result<Vec<Bar>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, limit
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/klines request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse klines response")?;

        if !status.is_success() {
            anyhow::bail!("Binance GET /api/v3/klines returned {}: {}", status, body);
        }

        let bars = parse_klines(&body, Self::timestamp_ms())?;
        debug!(symbol, interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }
}

/// Decode Binance's array-of-arrays kline payload.
pub(crate) fn parse_klines(body: &serde_json::Value, now_ms: i64) -> Result<Vec<Bar>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut bars = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() < 7 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let open_time = arr[0].as_i64().context("kline open time is not an integer")?;
        let close_time = arr[6].as_i64().context("kline close time is not an integer")?;

        bars.push(Bar {
            open_time,
            close_time,
            open: parse_str_f64(&arr[1])?,
            high: parse_str_f64(&arr[2])?,
            low: parse_str_f64(&arr[3])?,
            close: parse_str_f64(&arr[4])?,
            volume: parse_str_f64(&arr[5])?,
            is_closed: close_time < now_ms,
        });
    }
    Ok(bars)
}

/// Parse a JSON value that may be either a string or a number into `f64`.
pub(crate) fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_kline_rows() {
        let body = json!([
            [1_700_000_000_000i64, "100.0", "101.5", "99.5", "101.0", "12.5", 1_700_000_299_999i64, "0", 42, "0", "0", "0"],
            [1_700_000_300_000i64, "101.0", "102.0", "100.5", "101.8", "8.0", 1_700_000_599_999i64, "0", 17, "0", "0", "0"]
        ]);

        let bars = parse_klines(&body, 1_700_000_400_000).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, 101.0);
        assert!(bars[0].is_closed);
        assert!(!bars[1].is_closed);
        assert_eq!(bars[1].open_time, 1_700_000_300_000);
    }

    #[test]
    fn short_rows_are_skipped() {
        let body = json!([[1, "1"], [0, "1", "1", "1", "1", "1", 59_999]]);
        let bars = parse_klines(&body, 0).unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[test]
    fn non_array_body_is_an_error() {
        let body = json!({ "code": -1121, "msg": "Invalid symbol." });
        assert!(parse_klines(&body, 0).is_err());
    }

    #[test]
    fn numeric_prices_are_accepted() {
        assert_eq!(parse_str_f64(&json!(3.5)).unwrap(), 3.5);
        assert_eq!(parse_str_f64(&json!("2.25")).unwrap(), 2.25);
        assert!(parse_str_f64(&json!(null)).is_err());
    }
}
