//! Broker abstraction for live and paper trading.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use tw_risk::{PortfolioSnapshot, PositionSnapshot};
use tw_types::{BrokerError, Order, OrderRequest, OrderState};

/// Snapshot of an account as reported by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    /// Today's realised plus unrealised P&L.
    pub daily_pl: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One position held at the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub avg_entry_price: Decimal,
    pub unrealized_pl: Decimal,
}

/// Core broker interface.
///
/// Implementations must be safe to share across workers; all methods take
/// `&self` and serialise internally.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    async fn get_account(&self) -> Result<Account, BrokerError>;

    async fn list_positions(&self) -> Result<Vec<BrokerPosition>, BrokerError>;

    /// Orders, optionally filtered by state.
    async fn list_orders(&self, status: Option<OrderState>) -> Result<Vec<Order>, BrokerError>;

    /// Submit an order. Returns the acknowledged order with its
    /// broker-assigned id.
    async fn place_order(&self, request: &OrderRequest) -> Result<Order, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;
}

/// Per-owner broker registry. A live strategy can only be ACTIVE when its
/// owner has a registered broker.
#[derive(Default)]
pub struct BrokerRouter {
    brokers: RwLock<HashMap<String, Arc<dyn BrokerClient>>>,
}

impl BrokerRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, owner: &str, broker: Arc<dyn BrokerClient>) {
        self.brokers.write().insert(owner.to_string(), broker);
    }

    pub fn unregister(&self, owner: &str) {
        self.brokers.write().remove(owner);
    }

    pub fn get(&self, owner: &str) -> Option<Arc<dyn BrokerClient>> {
        self.brokers.read().get(owner).cloned()
    }

    pub fn has_credentials(&self, owner: &str) -> bool {
        self.brokers.read().contains_key(owner)
    }
}

/// Build a risk-evaluation snapshot from broker account and position
/// queries. `peak_equity` is supplied by the caller's peak tracker.
pub async fn snapshot_portfolio(
    broker: &dyn BrokerClient,
    peak_equity: Decimal,
) -> Result<PortfolioSnapshot, BrokerError> {
    let account = broker.get_account().await?;
    let positions = broker.list_positions().await?;

    Ok(PortfolioSnapshot {
        account_value: account.equity,
        cash: account.cash,
        buying_power: account.buying_power,
        positions: positions
            .into_iter()
            .map(|p| PositionSnapshot {
                symbol: p.symbol,
                quantity: p.quantity,
                market_value: p.market_value,
                unrealized_pl: p.unrealized_pl,
                avg_entry_price: p.avg_entry_price,
            })
            .collect(),
        daily_pl: account.daily_pl,
        peak_equity: peak_equity.max(account.equity),
    })
}
