use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Direction of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(&self) -> OrderSide {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

/// Order kinds accepted by the broker contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

/// Broker-side lifecycle state of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    New,
    Accepted,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

impl OrderState {
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            OrderState::New | OrderState::Accepted | OrderState::PartiallyFilled
        )
    }
}

/// What the executor asks the broker to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub limit_price: Option<Decimal>,
}

impl OrderRequest {
    pub fn market(symbol: &str, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            kind: OrderKind::Market,
            limit_price: None,
        }
    }

    pub fn limit(symbol: &str, side: OrderSide, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            quantity,
            kind: OrderKind::Limit,
            limit_price: Some(price),
        }
    }
}

/// An order as acknowledged by the broker. The id is broker-assigned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub live_strategy_id: Option<Uuid>,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub kind: OrderKind,
    pub limit_price: Option<Decimal>,
    pub status: OrderState,
    pub fill_price: Option<Decimal>,
    pub submitted_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Build an acknowledged order from a request.
    pub fn from_request(id: String, request: &OrderRequest) -> Self {
        Self {
            id,
            live_strategy_id: None,
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            kind: request.kind,
            limit_price: request.limit_price,
            status: OrderState::Accepted,
            fill_price: None,
            submitted_at: Utc::now(),
            filled_at: None,
        }
    }

    pub fn notional(&self) -> Option<Decimal> {
        self.fill_price
            .or(self.limit_price)
            .map(|p| p * self.quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_side_serde_lowercase() {
        assert_eq!(serde_json::to_string(&OrderSide::Buy).unwrap(), "\"buy\"");
        assert_eq!(
            serde_json::to_string(&OrderKind::Market).unwrap(),
            "\"market\""
        );
    }

    #[test]
    fn test_opposite_side() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_order_from_request() {
        let req = OrderRequest::market("AAPL", OrderSide::Buy, dec!(40));
        let order = Order::from_request("brk-1".into(), &req);
        assert_eq!(order.id, "brk-1");
        assert_eq!(order.status, OrderState::Accepted);
        assert!(order.status.is_open());
        assert_eq!(order.quantity, dec!(40));
    }

    #[test]
    fn test_notional_prefers_fill_price() {
        let req = OrderRequest::limit("AAPL", OrderSide::Sell, dec!(10), dec!(150));
        let mut order = Order::from_request("brk-2".into(), &req);
        assert_eq!(order.notional(), Some(dec!(1500)));

        order.fill_price = Some(dec!(149));
        assert_eq!(order.notional(), Some(dec!(1490)));
    }
}
