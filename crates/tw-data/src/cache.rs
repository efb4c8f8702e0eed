//! Read-through bar cache.
//!
//! The optimiser touches the same `(symbol, range)` repeatedly while the
//! grid fans out; memoising fetches keeps the underlying source read-only
//! and cheap.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use tw_types::{Bar, MarketDataError, Timeframe};

use crate::source::{BarQuery, MarketDataSource};

type CacheKey = (
    String,
    Timeframe,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
    Option<usize>,
);

/// Wraps any [`MarketDataSource`] with an in-memory query cache.
pub struct CachedDataSource {
    inner: Arc<dyn MarketDataSource>,
    cache: DashMap<CacheKey, Arc<Vec<Bar>>>,
}

impl CachedDataSource {
    pub fn new(inner: Arc<dyn MarketDataSource>) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Drop every cached series (e.g. after a session roll).
    pub fn clear(&self) {
        self.cache.clear();
    }

    fn key(query: &BarQuery) -> CacheKey {
        (
            query.symbol.clone(),
            query.timeframe,
            query.start,
            query.end,
            query.limit,
        )
    }
}

#[async_trait]
impl MarketDataSource for CachedDataSource {
    async fn get_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, MarketDataError> {
        let key = Self::key(query);
        if let Some(hit) = self.cache.get(&key) {
            debug!(symbol = %query.symbol, "bar cache hit");
            return Ok(hit.as_ref().clone());
        }

        let bars = self.inner.get_bars(query).await?;
        self.cache.insert(key, Arc::new(bars.clone()));
        Ok(bars)
    }
}
