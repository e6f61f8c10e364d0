//! Domain models shared across the whole rotation tracker.

pub mod activity;
pub mod cooldown;
pub mod portfolio;
pub mod ranking;

pub use activity::{ActivityAction, ActivityLogEntry, NewActivity};
pub use cooldown::{SaleReason, SoldPosition};
pub use portfolio::{
    Holding, NewSnapshot, PortfolioSnapshot, PriceMark, SnapshotDiff, SnapshotUpdate, TradeAction,
    TradeRecord, Zone, ZoneBasket,
};
pub use ranking::{latest_prices, PriceHistory, PricePoint, RankedTicker};

/// A stock symbol, e.g. `"NVDA"`. Opaque — compared and stored by value.
pub type Ticker = String;
