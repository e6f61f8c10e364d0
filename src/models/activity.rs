//! # models::activity
//!
//! Append-only audit trail. Entries are written by the orchestrator and the
//! admin endpoints and are never edited; the only way to remove them is the
//! explicit administrative reset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Ticker;

/// What kind of event an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityAction {
    Buy,
    Sell,
    Rebalance,
    Hold,
    /// First-ever cycle: initial allocation.
    Init,
    /// Screener scan (successful or skipped).
    Scan,
}

impl ActivityAction {
    #[cfg(feature = "postgres")]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityAction::Buy       => "BUY",
            ActivityAction::Sell      => "SELL",
            ActivityAction::Rebalance => "REBALANCE",
            ActivityAction::Hold      => "HOLD",
            ActivityAction::Init      => "INIT",
            ActivityAction::Scan      => "SCAN",
        }
    }
}

impl std::str::FromStr for ActivityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY"       => Ok(ActivityAction::Buy),
            "SELL"      => Ok(ActivityAction::Sell),
            "REBALANCE" => Ok(ActivityAction::Rebalance),
            "HOLD"      => Ok(ActivityAction::Hold),
            "INIT"      => Ok(ActivityAction::Init),
            "SCAN"      => Ok(ActivityAction::Scan),
            other       => Err(format!("unknown activity action '{other}'")),
        }
    }
}

/// A persisted audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub id:          i64,
    pub timestamp:   DateTime<Utc>,
    pub action:      ActivityAction,
    pub ticker:      Option<Ticker>,
    pub description: String,
    pub metadata:    Option<Value>,
}

/// An entry about to be appended; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub timestamp:   DateTime<Utc>,
    pub action:      ActivityAction,
    pub ticker:      Option<Ticker>,
    pub description: String,
    pub metadata:    Option<Value>,
}

impl NewActivity {
    pub fn new(action: ActivityAction, timestamp: DateTime<Utc>, description: impl Into<String>) -> Self {
        Self {
            timestamp,
            action,
            ticker: None,
            description: description.into(),
            metadata: None,
        }
    }

    pub fn ticker(mut self, ticker: impl Into<Ticker>) -> Self {
        self.ticker = Some(ticker.into());
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn into_entry(self, id: i64) -> ActivityLogEntry {
        ActivityLogEntry {
            id,
            timestamp:   self.timestamp,
            action:      self.action,
            ticker:      self.ticker,
            description: self.description,
            metadata:    self.metadata,
        }
    }
}
