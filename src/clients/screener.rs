//! # clients::screener — Finviz Screener
//!
//! GET the configured screener URL, pick every `quote.ashx?t=` link and pull
//! the symbol out of its `t=` parameter. The page lists a ticker several
//! times (logo, symbol, company name), so results are de-duplicated keeping
//! the first occurrence.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};

use crate::clients::{FetchError, UniverseSource};
use crate::models::Ticker;
use crate::policy::UNIVERSE_DEPTH;

/// Candidates kept from the page; the ranker reorders them anyway.
pub const MAX_CANDIDATES: usize = UNIVERSE_DEPTH as usize * 2;

/// Extract tickers from a screener page, in page order, without duplicates.
pub fn parse_tickers(html: &str) -> Result<Vec<Ticker>, FetchError> {
    let document = Html::parse_document(html);
    let links = Selector::parse(r#"a[href*="quote.ashx?t="]"#)
        .map_err(|e| FetchError::Parse(format!("selector: {e}")))?;
    let symbol = Regex::new(r"[?&]t=([A-Z.\-]+)")
        .map_err(|e| FetchError::Parse(format!("regex: {e}")))?;

    let mut tickers: Vec<Ticker> = Vec::new();
    for link in document.select(&links) {
        let Some(href) = link.value().attr("href") else { continue };
        let Some(caps) = symbol.captures(href) else { continue };
        let ticker = &caps[1];
        if !tickers.iter().any(|t| t == ticker) {
            tickers.push(ticker.to_string());
        }
    }

    Ok(tickers)
}

// ─── Finviz ───────────────────────────────────────────────────────────────────

pub struct FinvizScreener {
    client:  reqwest::Client,
    url:     String,
    timeout: Duration,
}

impl FinvizScreener {
    pub fn new(client: reqwest::Client, url: impl Into<String>, timeout: Duration) -> Self {
        Self { client, url: url.into(), timeout }
    }
}

#[async_trait]
impl UniverseSource for FinvizScreener {
    fn name(&self) -> &'static str {
        "finviz"
    }

    async fn fetch_universe(&self) -> Result<Vec<Ticker>, FetchError> {
        debug!(url = %self.url, "Fetching screener page");

        let response = self.client.get(&self.url).timeout(self.timeout).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                status: response.status().as_u16(),
                url:    self.url.clone(),
            });
        }

        let body = response.text().await?;
        let mut tickers = parse_tickers(&body)?;

        if tickers.is_empty() {
            return Err(FetchError::Empty("no quote links on screener page".into()));
        }
        tickers.truncate(MAX_CANDIDATES);

        if tickers.len() < UNIVERSE_DEPTH as usize {
            warn!(
                found    = tickers.len(),
                expected = UNIVERSE_DEPTH,
                "⚠️ Screener returned a short universe — proceeding with what is available"
            );
        }

        info!(count = tickers.len(), "🔎 Screener universe fetched");
        Ok(tickers)
    }
}

// ─── Mock ─────────────────────────────────────────────────────────────────────

/// Fixed universe for development without network access.
#[derive(Debug, Clone)]
pub struct MockScreener {
    pub tickers: Vec<Ticker>,
}

impl Default for MockScreener {
    fn default() -> Self {
        let tickers = [
            "MU", "CAT", "NEE", "ELAN", "SCCO", "XEL", "NVDA", "AMD", "AVGO", "ANET",
            "LRCX", "KLAC", "TSM", "ORCL", "GE", "ETN", "PWR", "VST", "CEG", "FIX",
        ];
        Self { tickers: tickers.iter().map(|t| t.to_string()).collect() }
    }
}

#[async_trait]
impl UniverseSource for MockScreener {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_universe(&self) -> Result<Vec<Ticker>, FetchError> {
        if self.tickers.is_empty() {
            return Err(FetchError::Empty("mock universe is empty".into()));
        }
        Ok(self.tickers.clone())
    }
}
