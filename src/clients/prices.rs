//! # clients::prices — Daily Close Feed
//!
//! Yahoo chart API (`/v8/finance/chart/{ticker}`), one request per ticker,
//! a few in flight at once. A ticker that fails is logged and left out; the
//! call only fails when no ticker at all came back.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use futures_util::{stream, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::clients::{FetchError, PriceFeed};
use crate::models::{PriceHistory, PricePoint, Ticker};

/// Requests in flight at once against the chart API.
const MAX_CONCURRENT: usize = 4;

/// Extra calendar days fetched before the window so weekends and holidays
/// at its start still leave a close to measure from.
const WINDOW_MARGIN_DAYS: i64 = 7;

// ─── Yahoo Chart Response ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: Chart,
}

#[derive(Debug, Deserialize)]
struct Chart {
    result: Option<Vec<ChartResult>>,
    error:  Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code:        String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    timestamp:  Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
struct Quote {
    close: Option<Vec<Option<f64>>>,
}

/// Parse a chart response body into daily closes. Null closes are skipped.
pub fn parse_chart(body: &str) -> Result<Vec<PricePoint>, FetchError> {
    let response: ChartResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Parse(e.to_string()))?;

    if let Some(err) = response.chart.error {
        return Err(FetchError::Parse(format!("{}: {}", err.code, err.description)));
    }

    let result = response
        .chart
        .result
        .and_then(|r| r.into_iter().next())
        .ok_or_else(|| FetchError::Empty("chart has no result".into()))?;

    let timestamps = result.timestamp.unwrap_or_default();
    let closes = result
        .indicators
        .quote
        .into_iter()
        .next()
        .and_then(|q| q.close)
        .unwrap_or_default();

    let points = timestamps
        .iter()
        .zip(closes)
        .filter_map(|(ts, close)| {
            let date = DateTime::from_timestamp(*ts, 0)?.date_naive();
            Some(PricePoint::new(date, close?))
        })
        .collect();

    Ok(points)
}

// ─── Yahoo ────────────────────────────────────────────────────────────────────

pub struct YahooPriceFeed {
    client:   reqwest::Client,
    base_url: String,
    timeout:  Duration,
}

impl YahooPriceFeed {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }

    async fn fetch_one(&self, ticker: &str, period1: i64, period2: i64) -> Result<Vec<PricePoint>, FetchError> {
        let url = format!(
            "{}/v8/finance/chart/{}?period1={}&period2={}&interval=1d",
            self.base_url, ticker, period1, period2
        );

        let response = self.client.get(&url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status { status: response.status().as_u16(), url });
        }

        let body = response.text().await?;
        parse_chart(&body)
    }
}

#[async_trait]
impl PriceFeed for YahooPriceFeed {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn get_prices(
        &self,
        tickers:       &[Ticker],
        lookback_days: i64,
        as_of:         NaiveDate,
    ) -> Result<PriceHistory, FetchError> {
        let start = as_of - chrono::Duration::days(lookback_days + WINDOW_MARGIN_DAYS);
        let end   = as_of + chrono::Duration::days(1);
        let period1 = Utc.from_utc_datetime(&start.and_time(Default::default())).timestamp();
        let period2 = Utc.from_utc_datetime(&end.and_time(Default::default())).timestamp();

        let results: Vec<(Ticker, Result<Vec<PricePoint>, FetchError>)> = stream::iter(tickers.iter().cloned())
            .map(|ticker| async move {
                let result = self.fetch_one(&ticker, period1, period2).await;
                (ticker, result)
            })
            .buffer_unordered(MAX_CONCURRENT)
            .collect()
            .await;

        let mut history = PriceHistory::new();
        let mut last_error = None;

        for (ticker, result) in results {
            match result {
                Ok(points) if !points.is_empty() => {
                    debug!(ticker = %ticker, points = points.len(), "Prices fetched");
                    history.insert(ticker, points);
                }
                Ok(_) => warn!(ticker = %ticker, "No closes returned — skipped"),
                Err(err) => {
                    warn!(ticker = %ticker, error = %err, "Price fetch failed — skipped");
                    last_error = Some(err);
                }
            }
        }

        if history.is_empty() && !tickers.is_empty() {
            return Err(last_error.unwrap_or_else(|| FetchError::Empty("no prices for any ticker".into())));
        }

        info!(requested = tickers.len(), served = history.len(), "📈 Price history fetched");
        Ok(history)
    }
}

// ─── Mock ─────────────────────────────────────────────────────────────────────

/// Deterministic synthetic closes: each ticker gets its own daily drift
/// derived from its symbol, so rankings are stable across runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MockPriceFeed;

impl MockPriceFeed {
    pub fn series(ticker: &str, lookback_days: i64, as_of: NaiveDate) -> Vec<PricePoint> {
        let seed: u32 = ticker.bytes().map(u32::from).fold(7, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
        let base  = 20.0 + (seed % 180) as f64;
        let drift = ((seed % 41) as f64 - 15.0) / 1_000.0;

        (0..=lookback_days + WINDOW_MARGIN_DAYS)
            .rev()
            .map(|back| {
                let date = as_of - chrono::Duration::days(back);
                let step = (lookback_days + WINDOW_MARGIN_DAYS - back) as i32;
                PricePoint::new(date, base * (1.0 + drift).powi(step))
            })
            .collect()
    }
}

#[async_trait]
impl PriceFeed for MockPriceFeed {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn get_prices(
        &self,
        tickers:       &[Ticker],
        lookback_days: i64,
        as_of:         NaiveDate,
    ) -> Result<PriceHistory, FetchError> {
        Ok(tickers
            .iter()
            .map(|t| (t.clone(), Self::series(t, lookback_days, as_of)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = r#"{
        "chart": {
            "result": [{
                "meta": { "symbol": "MU" },
                "timestamp": [1743427800, 1743514200, 1743600600],
                "indicators": { "quote": [{ "close": [101.5, null, 104.25] }] }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parses_closes_and_skips_nulls() {
        let points = parse_chart(BODY).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].close, 101.5);
        assert_eq!(points[1].close, 104.25);
        assert!(points[0].date < points[1].date);
    }

    #[test]
    fn chart_error_is_reported() {
        let body = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let err = parse_chart(body).unwrap_err();
        assert!(err.to_string().contains("delisted"));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_chart("<html>"), Err(FetchError::Parse(_))));
    }

    #[test]
    fn mock_series_is_deterministic_and_covers_window() {
        let as_of = NaiveDate::from_ymd_opt(2025, 4, 7).unwrap();
        let a = MockPriceFeed::series("NVDA", 30, as_of);
        let b = MockPriceFeed::series("NVDA", 30, as_of);
        assert_eq!(a, b);
        assert_eq!(a.last().unwrap().date, as_of);
        assert!(a.first().unwrap().date <= as_of - chrono::Duration::days(30));
        assert!(a.iter().all(|p| p.is_valid()));
    }
}
