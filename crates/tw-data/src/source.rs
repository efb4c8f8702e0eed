//! The market-data contract the core consumes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use tw_types::{Bar, MarketDataError, Timeframe};

/// Parameters of one bar fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct BarQuery {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Keep only the most recent `limit` bars of the selected range.
    pub limit: Option<usize>,
}

impl BarQuery {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.to_string(),
            timeframe,
            start: None,
            end: None,
            limit: None,
        }
    }

    pub fn range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self.end = Some(end);
        self
    }

    pub fn last(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Abstract OHLCV feed.
///
/// Contract: returned bars are strictly ascending by timestamp with no gaps
/// within a trading session; whole sessions may be missing. Failures raise
/// a typed [`MarketDataError`].
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    async fn get_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, MarketDataError>;
}
