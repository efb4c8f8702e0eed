use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The rule families the pre-trade evaluator knows how to project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRuleType {
    MaxPositionSize,
    MaxDailyLoss,
    MaxDrawdown,
    PositionLimit,
    MaxLeverage,
}

/// Action taken on breach.
///
/// Variant order is the action precedence: when several rules breach, the
/// strongest action wins (`CloseAll` > `ClosePosition` > `Block` >
/// `ReduceSize` > `Alert`).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskAction {
    Alert,
    ReduceSize,
    Block,
    ClosePosition,
    CloseAll,
}

impl RiskAction {
    /// Whether this action stops the proposed order outright.
    pub fn is_blocking(&self) -> bool {
        *self >= RiskAction::Block
    }
}

/// A user-owned pre-trade risk rule, optionally scoped to one strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    pub id: Uuid,
    pub owner: String,
    /// `None` = applies to every strategy of the owner.
    pub strategy_id: Option<Uuid>,
    pub name: String,
    pub rule_type: RiskRuleType,
    pub threshold: Decimal,
    pub action: RiskAction,
    pub is_active: bool,
    pub breach_count: u64,
    pub last_breach_at: Option<DateTime<Utc>>,
}

impl RiskRule {
    pub fn new(
        owner: &str,
        name: &str,
        rule_type: RiskRuleType,
        threshold: Decimal,
        action: RiskAction,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            strategy_id: None,
            name: name.to_string(),
            rule_type,
            threshold,
            action,
            is_active: true,
            breach_count: 0,
            last_breach_at: None,
        }
    }

    pub fn scoped_to(mut self, strategy_id: Uuid) -> Self {
        self.strategy_id = Some(strategy_id);
        self
    }

    /// Whether the rule applies to the given strategy scope.
    pub fn applies_to(&self, strategy_id: Option<Uuid>) -> bool {
        self.is_active
            && match self.strategy_id {
                None => true,
                Some(scoped) => strategy_id == Some(scoped),
            }
    }
}
