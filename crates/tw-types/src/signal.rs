use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Direction of a generated signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    pub fn is_actionable(&self) -> bool {
        !matches!(self, SignalType::Hold)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalType::Buy => "BUY",
            SignalType::Sell => "SELL",
            SignalType::Hold => "HOLD",
        };
        write!(f, "{s}")
    }
}

/// Append-only record of one strategy evaluation for one symbol.
///
/// Invariants: `Hold` signals have `strength = 0` and are never executed;
/// an executed signal always carries the broker order id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: Uuid,
    pub live_strategy_id: Uuid,
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub signal_type: SignalType,
    /// Confidence in [0, 1]; non-HOLD signals are clamped to ≥ 0.3.
    pub strength: f64,
    pub reasoning: String,
    /// Snapshot of the indicator values that produced the signal.
    pub indicators: BTreeMap<String, f64>,
    pub executed: bool,
    pub order_id: Option<String>,
}

impl SignalRecord {
    pub fn new(
        live_strategy_id: Uuid,
        symbol: &str,
        timestamp: DateTime<Utc>,
        signal_type: SignalType,
        strength: f64,
        reasoning: String,
        indicators: BTreeMap<String, f64>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            live_strategy_id,
            symbol: symbol.to_string(),
            timestamp,
            signal_type,
            strength,
            reasoning,
            indicators,
            executed: false,
            order_id: None,
        }
    }

    /// Hold record with zero strength.
    pub fn hold(
        live_strategy_id: Uuid,
        symbol: &str,
        timestamp: DateTime<Utc>,
        reasoning: String,
        indicators: BTreeMap<String, f64>,
    ) -> Self {
        Self::new(
            live_strategy_id,
            symbol,
            timestamp,
            SignalType::Hold,
            0.0,
            reasoning,
            indicators,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hold_record_has_zero_strength() {
        let rec = SignalRecord::hold(
            Uuid::new_v4(),
            "AAPL",
            Utc::now(),
            "no crossing".into(),
            BTreeMap::new(),
        );
        assert_eq!(rec.signal_type, SignalType::Hold);
        assert_eq!(rec.strength, 0.0);
        assert!(!rec.executed);
        assert!(rec.order_id.is_none());
    }

    #[test]
    fn test_signal_type_serde() {
        assert_eq!(
            serde_json::to_string(&SignalType::Buy).unwrap(),
            "\"BUY\""
        );
        let back: SignalType = serde_json::from_str("\"HOLD\"").unwrap();
        assert_eq!(back, SignalType::Hold);
    }

    #[test]
    fn test_actionable() {
        assert!(SignalType::Buy.is_actionable());
        assert!(SignalType::Sell.is_actionable());
        assert!(!SignalType::Hold.is_actionable());
    }
}
