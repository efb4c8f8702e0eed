//! Paper (simulated) broker.
//!
//! Executes orders entirely in-process against the latest seeded price.
//! Used for sandbox deployments, integration tests, and validating risk
//! controls before going live.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use tw_types::{BrokerError, Order, OrderKind, OrderRequest, OrderSide, OrderState};

use crate::broker::{Account, BrokerClient, BrokerPosition};

/// Configuration for the paper broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperBrokerConfig {
    pub initial_cash: Decimal,
    /// Simulated slippage as a fraction of price.
    pub slippage_pct: Decimal,
    pub commission_per_share: Decimal,
}

impl Default for PaperBrokerConfig {
    fn default() -> Self {
        Self {
            initial_cash: Decimal::from(100_000),
            slippage_pct: Decimal::new(5, 4), // 0.05%
            commission_per_share: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
struct PaperPosition {
    quantity: Decimal,
    avg_entry_price: Decimal,
}

#[derive(Debug, Default)]
struct PaperState {
    cash: Decimal,
    start_of_day_equity: Decimal,
    positions: HashMap<String, PaperPosition>,
    orders: HashMap<String, Order>,
    prices: HashMap<String, Decimal>,
    next_order_id: u64,
}

/// Fully in-process broker that simulates execution.
pub struct PaperBroker {
    config: PaperBrokerConfig,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(config: PaperBrokerConfig) -> Self {
        let state = PaperState {
            cash: config.initial_cash,
            start_of_day_equity: config.initial_cash,
            ..Default::default()
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(PaperBrokerConfig::default())
    }

    /// Seed the latest price for a symbol and try to fill resting limit
    /// orders against it.
    pub fn set_price(&self, symbol: &str, price: Decimal) {
        let mut state = self.state.lock();
        state.prices.insert(symbol.to_string(), price);

        let fillable: Vec<String> = state
            .orders
            .values()
            .filter(|o| o.symbol == symbol && o.status.is_open())
            .filter(|o| match (o.kind, o.limit_price) {
                (OrderKind::Limit, Some(limit)) => match o.side {
                    OrderSide::Buy => price <= limit,
                    OrderSide::Sell => price >= limit,
                },
                _ => false,
            })
            .map(|o| o.id.clone())
            .collect();

        for order_id in fillable {
            let _ = Self::fill_order(&self.config, &mut state, &order_id, price);
        }
    }

    /// Mark the current equity as the start-of-day reference.
    pub fn roll_session(&self) {
        let mut state = self.state.lock();
        state.start_of_day_equity = Self::equity_locked(&state);
    }

    fn equity_locked(state: &PaperState) -> Decimal {
        let position_value: Decimal = state
            .positions
            .iter()
            .map(|(symbol, p)| {
                let price = state
                    .prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(p.avg_entry_price);
                p.quantity * price
            })
            .sum();
        state.cash + position_value
    }

    fn fill_order(
        config: &PaperBrokerConfig,
        state: &mut PaperState,
        order_id: &str,
        market_price: Decimal,
    ) -> Result<(), BrokerError> {
        let order = state
            .orders
            .get(order_id)
            .cloned()
            .ok_or(BrokerError::OrderNotFound {
                order_id: order_id.to_string(),
            })?;

        let slip = market_price * config.slippage_pct;
        let fill_price = match order.side {
            OrderSide::Buy => market_price + slip,
            OrderSide::Sell => market_price - slip,
        };
        let commission = order.quantity * config.commission_per_share;

        match order.side {
            OrderSide::Buy => {
                let cost = order.quantity * fill_price + commission;
                if cost > state.cash {
                    if let Some(o) = state.orders.get_mut(order_id) {
                        o.status = OrderState::Rejected;
                    }
                    return Err(BrokerError::InsufficientFunds {
                        required: cost.round_dp(2).to_string(),
                        available: state.cash.round_dp(2).to_string(),
                    });
                }
                state.cash -= cost;

                let position = state
                    .positions
                    .entry(order.symbol.clone())
                    .or_insert(PaperPosition {
                        quantity: Decimal::ZERO,
                        avg_entry_price: Decimal::ZERO,
                    });
                let total_cost =
                    position.quantity * position.avg_entry_price + order.quantity * fill_price;
                position.quantity += order.quantity;
                if position.quantity > Decimal::ZERO {
                    position.avg_entry_price = total_cost / position.quantity;
                }
            }
            OrderSide::Sell => {
                let held = state
                    .positions
                    .get(&order.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held < order.quantity {
                    if let Some(o) = state.orders.get_mut(order_id) {
                        o.status = OrderState::Rejected;
                    }
                    return Err(BrokerError::OrderRejected {
                        reason: format!(
                            "cannot sell {} {}: only {held} held",
                            order.quantity, order.symbol
                        ),
                    });
                }
                state.cash += order.quantity * fill_price - commission;
                let now_flat = match state.positions.get_mut(&order.symbol) {
                    Some(position) => {
                        position.quantity -= order.quantity;
                        position.quantity <= Decimal::ZERO
                    }
                    None => false,
                };
                if now_flat {
                    state.positions.remove(&order.symbol);
                }
            }
        }

        if let Some(o) = state.orders.get_mut(order_id) {
            o.status = OrderState::Filled;
            o.fill_price = Some(fill_price);
            o.filled_at = Some(Utc::now());
        }

        info!(
            order_id = %order_id,
            symbol = %order.symbol,
            side = %order.side,
            quantity = %order.quantity,
            price = %fill_price,
            "paper broker: order filled"
        );
        Ok(())
    }
}

#[async_trait]
impl BrokerClient for PaperBroker {
    async fn get_account(&self) -> Result<Account, BrokerError> {
        let state = self.state.lock();
        let equity = Self::equity_locked(&state);
        Ok(Account {
            equity,
            cash: state.cash,
            buying_power: state.cash,
            daily_pl: equity - state.start_of_day_equity,
            timestamp: Utc::now(),
        })
    }

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError> {
        let state = self.state.lock();
        Ok(state
            .positions
            .iter()
            .filter(|(_, p)| p.quantity > Decimal::ZERO)
            .map(|(symbol, p)| {
                let price = state
                    .prices
                    .get(symbol)
                    .copied()
                    .unwrap_or(p.avg_entry_price);
                BrokerPosition {
                    symbol: symbol.clone(),
                    quantity: p.quantity,
                    market_value: p.quantity * price,
                    avg_entry_price: p.avg_entry_price,
                    unrealized_pl: p.quantity * (price - p.avg_entry_price),
                }
            })
            .collect())
    }

    async fn list_orders(&self, status: Option<OrderState>) -> Result<Vec<Order>, BrokerError> {
        let state = self.state.lock();
        Ok(state
            .orders
            .values()
            .filter(|o| status.map_or(true, |s| o.status == s))
            .cloned()
            .collect())
    }

    async fn place_order(&self, request: &OrderRequest) -> Result<Order, BrokerError> {
        if request.quantity <= Decimal::ZERO {
            return Err(BrokerError::OrderRejected {
                reason: "quantity must be positive".into(),
            });
        }

        let mut state = self.state.lock();
        state.next_order_id += 1;
        let order_id = format!("paper-{}", state.next_order_id);
        let order = Order::from_request(order_id.clone(), request);

        match request.kind {
            OrderKind::Market => {
                let price = state.prices.get(&request.symbol).copied().ok_or_else(|| {
                    BrokerError::OrderRejected {
                        reason: format!("no market price for {}", request.symbol),
                    }
                })?;
                state.orders.insert(order_id.clone(), order);
                Self::fill_order(&self.config, &mut state, &order_id, price)?;
            }
            OrderKind::Limit => {
                state.orders.insert(order_id.clone(), order);
            }
        }

        state
            .orders
            .get(&order_id)
            .cloned()
            .ok_or(BrokerError::OrderNotFound { order_id })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock();
        match state.orders.get_mut(order_id) {
            Some(order) if order.status.is_open() => {
                order.status = OrderState::Canceled;
                Ok(())
            }
            Some(_) => Err(BrokerError::OrderRejected {
                reason: "order is not open".into(),
            }),
            None => Err(BrokerError::OrderNotFound {
                order_id: order_id.to_string(),
            }),
        }
    }
}
