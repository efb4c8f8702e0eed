//! CSV bar loading for fixtures and backtests.
//!
//! Expected header: `timestamp,open,high,low,close,volume` with RFC 3339
//! timestamps.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

use tw_types::{Bar, MarketDataError};

#[derive(Debug, Deserialize)]
struct CsvBar {
    timestamp: DateTime<Utc>,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

/// Load an ascending bar series from a CSV file.
pub fn load_bars_csv(path: &Path) -> Result<Vec<Bar>, MarketDataError> {
    let mut reader = csv::Reader::from_path(path).map_err(|e| MarketDataError::Malformed {
        message: format!("cannot open {}: {e}", path.display()),
    })?;

    let mut bars = Vec::new();
    for row in reader.deserialize::<CsvBar>() {
        let row = row.map_err(|e| MarketDataError::Malformed {
            message: format!("bad CSV row: {e}"),
        })?;
        bars.push(Bar::new(
            row.timestamp,
            row.open,
            row.high,
            row.low,
            row.close,
            row.volume,
        ));
    }

    // The contract requires strictly ascending timestamps.
    for pair in bars.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(MarketDataError::Malformed {
                message: format!(
                    "bars out of order at {}",
                    pair[1].timestamp.to_rfc3339()
                ),
            });
        }
    }

    Ok(bars)
}
