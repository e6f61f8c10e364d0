//! # clients — External Collaborators
//!
//! Thin I/O wrappers the orchestrator consumes through traits:
//!
//! | Trait              | Real implementation            | `mock` URL                     |
//! |--------------------|--------------------------------|--------------------------------|
//! | [`UniverseSource`] | Finviz screener page (scraped) | fixed built-in universe        |
//! | [`PriceFeed`]      | Yahoo chart API                | deterministic synthetic series |
//!
//! Every failure comes back as a [`FetchError`]; the orchestrator treats it as
//! "skip this cycle", never as an empty result.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use thiserror::Error;
use tracing::warn;

use crate::models::{PriceHistory, Ticker};

pub mod prices;
pub mod screener;

pub use prices::{MockPriceFeed, YahooPriceFeed};
pub use screener::{FinvizScreener, MockScreener};

/// Browser User-Agent; the screener refuses obvious bots.
pub const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// URL value that selects the built-in mock implementation.
pub const MOCK_URL: &str = "mock";

// ─── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Parse error: {0}")]
    Parse(String),

    /// The source answered but had nothing usable.
    #[error("No data: {0}")]
    Empty(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(err.to_string())
        } else {
            FetchError::Network(err.to_string())
        }
    }
}

// ─── Traits ───────────────────────────────────────────────────────────────────

#[async_trait]
pub trait UniverseSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Candidate tickers in the source's own order. Never `Ok(vec![])`.
    async fn fetch_universe(&self) -> Result<Vec<Ticker>, FetchError>;
}

#[async_trait]
pub trait PriceFeed: Send + Sync {
    fn name(&self) -> &'static str;

    /// Daily closes covering at least `[as_of − lookback_days, as_of]`.
    /// Tickers the feed could not serve are absent; `Err` only when nothing
    /// at all came back.
    async fn get_prices(
        &self,
        tickers:       &[Ticker],
        lookback_days: i64,
        as_of:         NaiveDate,
    ) -> Result<PriceHistory, FetchError>;
}

// ─── Factories ────────────────────────────────────────────────────────────────

/// Shared HTTP client with the browser User-Agent. Per-call timeouts are set
/// by each collaborator.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(BROWSER_USER_AGENT)
        .build()
        .unwrap_or_else(|err| {
            warn!(%err, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

pub fn universe_source(url: &str, client: reqwest::Client, timeout: Duration) -> Arc<dyn UniverseSource> {
    if url == MOCK_URL {
        warn!("SCREENER_URL=mock — using the built-in universe");
        Arc::new(MockScreener::default())
    } else {
        Arc::new(FinvizScreener::new(client, url, timeout))
    }
}

pub fn price_feed(url: &str, client: reqwest::Client, timeout: Duration) -> Arc<dyn PriceFeed> {
    if url == MOCK_URL {
        warn!("PRICE_FEED_URL=mock — using synthetic prices");
        Arc::new(MockPriceFeed)
    } else {
        Arc::new(YahooPriceFeed::new(client, url, timeout))
    }
}
