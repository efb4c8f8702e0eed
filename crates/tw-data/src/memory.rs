//! In-memory bar fixture source for tests, backtests, and the demo service.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use tw_types::{Bar, MarketDataError, Timeframe};

use crate::source::{BarQuery, MarketDataSource};

/// Holds pre-registered bar series keyed by `(symbol, timeframe)`.
#[derive(Debug, Default)]
pub struct MemoryDataSource {
    series: RwLock<HashMap<(String, Timeframe), Vec<Bar>>>,
}

impl MemoryDataSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bar series. Bars must already be ascending by timestamp.
    pub fn insert(&self, symbol: &str, timeframe: Timeframe, bars: Vec<Bar>) {
        self.series
            .write()
            .insert((symbol.to_string(), timeframe), bars);
    }

    /// Append one bar to an existing series (creating it if absent).
    pub fn push(&self, symbol: &str, timeframe: Timeframe, bar: Bar) {
        self.series
            .write()
            .entry((symbol.to_string(), timeframe))
            .or_default()
            .push(bar);
    }
}

#[async_trait]
impl MarketDataSource for MemoryDataSource {
    async fn get_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, MarketDataError> {
        let series = self.series.read();
        let bars = series
            .get(&(query.symbol.clone(), query.timeframe))
            .ok_or_else(|| MarketDataError::SymbolNotFound {
                symbol: query.symbol.clone(),
            })?;

        let mut selected: Vec<Bar> = bars
            .iter()
            .filter(|b| {
                query.start.map_or(true, |s| b.timestamp >= s)
                    && query.end.map_or(true, |e| b.timestamp <= e)
            })
            .cloned()
            .collect();

        if selected.is_empty() {
            return Err(MarketDataError::NoDataInRange {
                symbol: query.symbol.clone(),
                start: query.start.map(|t| t.to_rfc3339()).unwrap_or_default(),
                end: query.end.map(|t| t.to_rfc3339()).unwrap_or_default(),
            });
        }

        if let Some(limit) = query.limit {
            if selected.len() > limit {
                selected = selected.split_off(selected.len() - limit);
            }
        }

        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic;
    use chrono::{Duration, Utc};

    #[test]
    fn test_limit_keeps_most_recent() {
        let source = MemoryDataSource::new();
        let start = Utc::now() - Duration::days(10);
        let bars = synthetic::random_walk("AAPL", start, 10, 100.0, 7);
        let last_ts = bars.last().unwrap().timestamp;
        source.insert("AAPL", Timeframe::OneDay, bars);

        let query = BarQuery::new("AAPL", Timeframe::OneDay).last(3);
        let got = tokio_test::block_on(source.get_bars(&query)).unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(got.last().unwrap().timestamp, last_ts);
    }

    #[test]
    fn test_unknown_symbol_is_typed_error() {
        let source = MemoryDataSource::new();
        let query = BarQuery::new("ZZZZ", Timeframe::OneDay);
        let err = tokio_test::block_on(source.get_bars(&query)).unwrap_err();
        assert!(matches!(err, MarketDataError::SymbolNotFound { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_range_filter() {
        let source = MemoryDataSource::new();
        let start = Utc::now() - Duration::days(30);
        source.insert(
            "MSFT",
            Timeframe::OneDay,
            synthetic::random_walk("MSFT", start, 30, 300.0, 1),
        );

        let from = start + Duration::days(10);
        let to = start + Duration::days(19);
        let query = BarQuery::new("MSFT", Timeframe::OneDay).range(from, to);
        let got = tokio_test::block_on(source.get_bars(&query)).unwrap();
        assert_eq!(got.len(), 10);
        assert!(got.first().unwrap().timestamp >= from);
        assert!(got.last().unwrap().timestamp <= to);
    }

    #[test]
    fn test_empty_range_is_no_data_error() {
        let source = MemoryDataSource::new();
        let start = Utc::now() - Duration::days(5);
        source.insert(
            "MSFT",
            Timeframe::OneDay,
            synthetic::random_walk("MSFT", start, 5, 300.0, 1),
        );

        let query = BarQuery::new("MSFT", Timeframe::OneDay)
            .range(start - Duration::days(30), start - Duration::days(20));
        let err = tokio_test::block_on(source.get_bars(&query)).unwrap_err();
        assert!(matches!(err, MarketDataError::NoDataInRange { .. }));
    }
}
