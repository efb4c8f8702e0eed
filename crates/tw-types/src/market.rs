use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One OHLCV observation over a fixed timeframe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn new(
        timestamp: DateTime<Utc>,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Typical price (HLC/3).
    pub fn typical_price(&self) -> Decimal {
        (self.high + self.low + self.close) / Decimal::from(3)
    }

    /// True range relative to the previous close.
    pub fn true_range(&self, prev_close: Option<Decimal>) -> Decimal {
        let high_low = self.high - self.low;
        match prev_close {
            Some(prev) => {
                let high_prev = (self.high - prev).abs();
                let low_prev = (self.low - prev).abs();
                high_low.max(high_prev).max(low_prev)
            }
            None => high_low,
        }
    }
}

/// Bar timeframe recognised by the market-data contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    OneDay,
}

impl Timeframe {
    /// Wire token used by data providers (`1Min`, `5Min`, `15Min`, `1Hour`, `1Day`).
    pub fn token(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1Min",
            Timeframe::FiveMin => "5Min",
            Timeframe::FifteenMin => "15Min",
            Timeframe::OneHour => "1Hour",
            Timeframe::OneDay => "1Day",
        }
    }

    pub fn to_seconds(&self) -> u64 {
        match self {
            Timeframe::OneMin => 60,
            Timeframe::FiveMin => 300,
            Timeframe::FifteenMin => 900,
            Timeframe::OneHour => 3600,
            Timeframe::OneDay => 86400,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1Min" => Ok(Timeframe::OneMin),
            "5Min" => Ok(Timeframe::FiveMin),
            "15Min" => Ok(Timeframe::FifteenMin),
            "1Hour" => Ok(Timeframe::OneHour),
            "1Day" => Ok(Timeframe::OneDay),
            other => Err(format!("unknown timeframe token: {other}")),
        }
    }
}
