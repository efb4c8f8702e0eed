//! Pre-trade rule evaluation with block / reduce / alert semantics.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use tw_types::{NotificationPriority, OrderSide, RiskAction, RiskRule, RiskRuleType};

/// Assumed adverse move on the proposed notional when projecting the
/// worst case for MAX_DAILY_LOSS.
pub const WORST_CASE_MOVE_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 2); // 0.05

/// One open position as seen at the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub unrealized_pl: Decimal,
    pub avg_entry_price: Decimal,
}

/// Point-in-time portfolio state the evaluator projects against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    /// Total account equity.
    pub account_value: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    pub positions: Vec<PositionSnapshot>,
    /// Today's realised plus unrealised P&L.
    pub daily_pl: Decimal,
    /// Rolling peak equity for drawdown projection.
    pub peak_equity: Decimal,
}

impl PortfolioSnapshot {
    /// Snapshot of an empty account, used by the zero-filled failure path.
    pub fn empty() -> Self {
        Self {
            account_value: Decimal::ZERO,
            cash: Decimal::ZERO,
            buying_power: Decimal::ZERO,
            positions: Vec::new(),
            daily_pl: Decimal::ZERO,
            peak_equity: Decimal::ZERO,
        }
    }

    pub fn gross_exposure(&self) -> Decimal {
        self.positions.iter().map(|p| p.market_value.abs()).sum()
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions
            .iter()
            .any(|p| p.symbol == symbol && p.quantity != Decimal::ZERO)
    }

    pub fn open_position_count(&self) -> usize {
        self.positions
            .iter()
            .filter(|p| p.quantity != Decimal::ZERO)
            .count()
    }
}

/// The order the executor wants to place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub estimated_price: Decimal,
}

impl TradeProposal {
    pub fn notional(&self) -> Decimal {
        self.quantity * self.estimated_price
    }
}

/// One rule whose threshold the projection exceeded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleBreach {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub rule_type: RiskRuleType,
    pub threshold: Decimal,
    pub observed: Decimal,
    pub action: RiskAction,
}

impl RuleBreach {
    fn describe(&self) -> String {
        let threshold = self.threshold.normalize();
        match self.rule_type {
            RiskRuleType::MaxPositionSize => format!(
                "position size {} > {threshold}",
                self.observed.round_dp(2).normalize()
            ),
            RiskRuleType::PositionLimit => format!(
                "open positions {} > {threshold}",
                self.observed.normalize()
            ),
            RiskRuleType::MaxDailyLoss => format!(
                "projected daily loss {} >= {threshold}",
                self.observed.round_dp(2).normalize()
            ),
            RiskRuleType::MaxDrawdown => format!(
                "drawdown {} > {threshold}",
                self.observed.round_dp(4).normalize()
            ),
            RiskRuleType::MaxLeverage => format!(
                "leverage {} > {threshold}",
                self.observed.round_dp(2).normalize()
            ),
        }
    }
}

/// What the executor should do with the proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskDecision {
    Approve,
    Alert,
    ReduceSize { quantity: Decimal },
    Block,
    ClosePosition,
    CloseAll,
}

/// Aggregate result of a pre-trade evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskVerdict {
    pub decision: RiskDecision,
    pub breaches: Vec<RuleBreach>,
    pub reason: String,
}

impl RiskVerdict {
    fn approved() -> Self {
        Self {
            decision: RiskDecision::Approve,
            breaches: Vec::new(),
            reason: "all rules clear".into(),
        }
    }

    /// Whether the proposal must not be submitted as-is.
    pub fn is_blocking(&self) -> bool {
        matches!(
            self.decision,
            RiskDecision::Block | RiskDecision::ClosePosition | RiskDecision::CloseAll
        )
    }

    /// Notification priority derived from the decision, `None` when nothing
    /// needs to be said.
    pub fn notification_priority(&self) -> Option<NotificationPriority> {
        match self.decision {
            RiskDecision::Approve => None,
            RiskDecision::Alert => Some(NotificationPriority::Low),
            RiskDecision::ReduceSize { .. } => Some(NotificationPriority::Medium),
            RiskDecision::Block | RiskDecision::ClosePosition | RiskDecision::CloseAll => {
                Some(NotificationPriority::High)
            }
        }
    }

    /// `(rule_id)` list for breach bookkeeping in the store.
    pub fn breached_rule_ids(&self) -> Vec<Uuid> {
        self.breaches.iter().map(|b| b.rule_id).collect()
    }
}

/// Evaluate a proposed order against the owner's active rules.
///
/// Projections are computed post-trade; breached rules aggregate by action
/// precedence (strongest wins). `ReduceSize` searches for the largest
/// integer quantity that clears every threshold.
pub fn evaluate(
    rules: &[RiskRule],
    snapshot: &PortfolioSnapshot,
    proposal: &TradeProposal,
) -> RiskVerdict {
    let breaches = collect_breaches(rules, snapshot, proposal, proposal.quantity);
    if breaches.is_empty() {
        return RiskVerdict::approved();
    }

    let strongest = match breaches.iter().max_by_key(|b| b.action) {
        Some(breach) => breach,
        None => return RiskVerdict::approved(),
    };
    let action = strongest.action;
    let reason = format!("{}: {}", action_label(action), strongest.describe());

    warn!(
        symbol = %proposal.symbol,
        action = ?action,
        breached = breaches.len(),
        reason = %reason,
        "pre-trade risk breach"
    );

    let decision = match action {
        RiskAction::Alert => RiskDecision::Alert,
        RiskAction::ReduceSize => RiskDecision::ReduceSize {
            quantity: reduce_quantity(rules, snapshot, proposal),
        },
        RiskAction::Block => RiskDecision::Block,
        RiskAction::ClosePosition => RiskDecision::ClosePosition,
        RiskAction::CloseAll => RiskDecision::CloseAll,
    };

    RiskVerdict {
        decision,
        breaches,
        reason,
    }
}

fn action_label(action: RiskAction) -> &'static str {
    match action {
        RiskAction::Alert => "ALERT",
        RiskAction::ReduceSize => "REDUCE_SIZE",
        RiskAction::Block => "BLOCK",
        RiskAction::ClosePosition => "CLOSE_POSITION",
        RiskAction::CloseAll => "CLOSE_ALL",
    }
}

/// All breaches at a hypothetical quantity.
fn collect_breaches(
    rules: &[RiskRule],
    snapshot: &PortfolioSnapshot,
    proposal: &TradeProposal,
    quantity: Decimal,
) -> Vec<RuleBreach> {
    let notional = quantity * proposal.estimated_price;
    let mut breaches = Vec::new();

    for rule in rules.iter().filter(|r| r.is_active) {
        let observed = match rule.rule_type {
            RiskRuleType::MaxPositionSize => {
                if notional > rule.threshold {
                    Some(notional)
                } else {
                    None
                }
            }
            RiskRuleType::PositionLimit => {
                let opens_new = quantity > Decimal::ZERO
                    && !snapshot.has_position(&proposal.symbol);
                let projected =
                    Decimal::from(snapshot.open_position_count()) + Decimal::from(opens_new as u8);
                if projected > rule.threshold {
                    Some(projected)
                } else {
                    None
                }
            }
            RiskRuleType::MaxDailyLoss => {
                let worst_case = notional * WORST_CASE_MOVE_PCT;
                if snapshot.daily_pl - worst_case <= -rule.threshold {
                    Some(worst_case - snapshot.daily_pl)
                } else {
                    None
                }
            }
            RiskRuleType::MaxDrawdown => {
                if snapshot.peak_equity > Decimal::ZERO {
                    let drawdown = (snapshot.peak_equity - snapshot.account_value)
                        / snapshot.peak_equity;
                    if drawdown > rule.threshold {
                        Some(drawdown)
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
            RiskRuleType::MaxLeverage => {
                if snapshot.account_value > Decimal::ZERO {
                    let leverage =
                        (snapshot.gross_exposure() + notional) / snapshot.account_value;
                    if leverage > rule.threshold {
                        Some(leverage)
                    } else {
                        None
                    }
                } else {
                    None
                }
            }
        };

        if let Some(observed) = observed {
            breaches.push(RuleBreach {
                rule_id: rule.id,
                rule_name: rule.name.clone(),
                rule_type: rule.rule_type,
                threshold: rule.threshold,
                observed,
                action: rule.action,
            });
        }
    }

    breaches
}

/// Largest whole-share quantity that clears every threshold. Binary search
/// works because every projection is monotone non-decreasing in quantity.
fn reduce_quantity(
    rules: &[RiskRule],
    snapshot: &PortfolioSnapshot,
    proposal: &TradeProposal,
) -> Decimal {
    let feasible = |quantity: Decimal| {
        collect_breaches(rules, snapshot, proposal, quantity).is_empty()
    };

    let mut lo = 0u64;
    let mut hi = proposal
        .quantity
        .floor()
        .try_into()
        .unwrap_or(0u64);

    if feasible(Decimal::from(hi)) {
        return Decimal::from(hi);
    }

    while lo < hi {
        let mid = (lo + hi + 1) / 2;
        if feasible(Decimal::from(mid)) {
            lo = mid;
        } else {
            hi = mid - 1;
        }
    }
    Decimal::from(lo)
}
