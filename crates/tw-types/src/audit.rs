use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::orders::OrderSide;

/// Kind of event recorded in the trade audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditEvent {
    Signal,
    Order,
    Fill,
    Error,
}

/// One append-only audit record. Never mutated or deleted by business logic.
///
/// For a given order id, records appear in the order
/// `signal` < `order` < `fill`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    /// UTC, RFC 3339 on the wire.
    pub timestamp: DateTime<Utc>,
    pub owner: String,
    pub event_type: AuditEvent,
    pub strategy_id: Option<Uuid>,
    pub symbol: Option<String>,
    pub side: Option<OrderSide>,
    pub quantity: Option<Decimal>,
    pub price: Option<Decimal>,
    pub order_id: Option<String>,
    pub details: serde_json::Value,
}

impl AuditRecord {
    pub fn new(owner: &str, event_type: AuditEvent, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp,
            owner: owner.to_string(),
            event_type,
            strategy_id: None,
            symbol: None,
            side: None,
            quantity: None,
            price: None,
            order_id: None,
            details: serde_json::Value::Null,
        }
    }

    pub fn with_strategy(mut self, strategy_id: Uuid) -> Self {
        self.strategy_id = Some(strategy_id);
        self
    }

    pub fn with_symbol(mut self, symbol: &str) -> Self {
        self.symbol = Some(symbol.to_string());
        self
    }

    pub fn with_side(mut self, side: OrderSide) -> Self {
        self.side = Some(side);
        self
    }

    pub fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_price(mut self, price: Decimal) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_order_id(mut self, order_id: &str) -> Self {
        self.order_id = Some(order_id.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_audit_builder() {
        let strategy_id = Uuid::new_v4();
        let rec = AuditRecord::new("alice", AuditEvent::Order, Utc::now())
            .with_strategy(strategy_id)
            .with_symbol("AAPL")
            .with_side(OrderSide::Buy)
            .with_quantity(dec!(40))
            .with_price(dec!(49))
            .with_order_id("brk-7")
            .with_details(serde_json::json!({"signal_id": "abc"}));

        assert_eq!(rec.event_type, AuditEvent::Order);
        assert_eq!(rec.strategy_id, Some(strategy_id));
        assert_eq!(rec.order_id.as_deref(), Some("brk-7"));
        assert_eq!(rec.details["signal_id"], "abc");
    }

    #[test]
    fn test_event_type_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&AuditEvent::Signal).unwrap(),
            "\"signal\""
        );
        assert_eq!(
            serde_json::to_string(&AuditEvent::Error).unwrap(),
            "\"error\""
        );
    }
}
