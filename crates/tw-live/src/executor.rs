//! Signal executor: converts an actionable signal into a sized,
//! risk-checked, audit-logged order.
//!
//! Failure policy: nothing here ever tears down the scheduler loop. Risk
//! breaches come back as negative results, transient broker faults are
//! retried with exponential back-off, terminal faults are audited and
//! reported. Once a broker call has succeeded, the audit entry and counter
//! bump are written even if cancellation arrived mid-call.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use tw_data::StateStore;
use tw_risk::{evaluate, position_size, RiskDecision, SizingInputs, TradeProposal};
use tw_types::{
    AuditEvent, AuditRecord, BrokerError, Clock, LiveStrategy, LiveStrategyDiff, Notification,
    NotificationKind, NotificationPriority, NotificationSink, OrderRequest, OrderSide,
    RetryConfig, RiskSettings, SignalRecord, SignalType,
};

use crate::broker::{snapshot_portfolio, BrokerRouter};
use crate::ratelimit::OwnerRateLimiter;
use crate::{CancelFlag, BROKER_TIMEOUT_SECS};

/// Rolling equity peaks per owner, shared between the executor (drawdown
/// projection) and the dashboard.
#[derive(Debug, Default)]
pub struct PeakTracker {
    peaks: Mutex<HashMap<String, Decimal>>,
}

impl PeakTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an equity observation; returns the updated peak.
    pub fn observe(&self, owner: &str, equity: Decimal) -> Decimal {
        let mut peaks = self.peaks.lock();
        let peak = peaks.entry(owner.to_string()).or_insert(equity);
        if equity > *peak {
            *peak = equity;
        }
        *peak
    }

    pub fn peak(&self, owner: &str) -> Decimal {
        self.peaks
            .lock()
            .get(owner)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }
}

/// Per-call execution options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutorOpts {
    /// Audit the signal but place no order.
    pub dry_run: bool,
    /// Explicit quantity override; sizing is skipped when present.
    pub quantity: Option<Decimal>,
}

/// Result of one execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub execution_price: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub dry_run: bool,
    /// Rate-limit starvation: try again next check, not a failure.
    pub deferred: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionResult {
    fn base(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: false,
            order_id: None,
            execution_price: None,
            quantity: None,
            dry_run: false,
            deferred: false,
            error: None,
            timestamp,
        }
    }

    fn ok(timestamp: DateTime<Utc>) -> Self {
        Self {
            success: true,
            ..Self::base(timestamp)
        }
    }

    fn failed(timestamp: DateTime<Utc>, reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
            ..Self::base(timestamp)
        }
    }

    fn deferred(timestamp: DateTime<Utc>) -> Self {
        Self {
            deferred: true,
            ..Self::base(timestamp)
        }
    }
}

/// Collaborators of the executor.
pub struct ExecutorDeps {
    pub store: Arc<dyn StateStore>,
    pub brokers: Arc<BrokerRouter>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    pub rate_limiter: Arc<OwnerRateLimiter>,
    pub peaks: Arc<PeakTracker>,
}

/// Turns signals into orders.
pub struct SignalExecutor {
    deps: ExecutorDeps,
    retry: RetryConfig,
    risk_settings: RiskSettings,
}

impl SignalExecutor {
    pub fn new(deps: ExecutorDeps, retry: RetryConfig, risk_settings: RiskSettings) -> Self {
        Self {
            deps,
            retry,
            risk_settings,
        }
    }

    /// Execute one signal for one live strategy.
    pub async fn execute(
        &self,
        signal: &SignalRecord,
        live: &LiveStrategy,
        opts: &ExecutorOpts,
        cancel: &CancelFlag,
    ) -> ExecutionResult {
        let now = self.deps.clock.now();

        // HOLD is a successful no-op.
        if signal.signal_type == SignalType::Hold {
            return ExecutionResult::ok(now);
        }
        let side = match signal.signal_type {
            SignalType::Buy => OrderSide::Buy,
            SignalType::Sell => OrderSide::Sell,
            SignalType::Hold => unreachable!(),
        };

        let broker = match self.deps.brokers.get(&live.owner) {
            Some(broker) => broker,
            None => {
                let reason = format!("no broker registered for owner {}", live.owner);
                self.audit_error(live, signal, &reason, true).await;
                return ExecutionResult::failed(now, reason);
            }
        };

        let price = match signal
            .indicators
            .get("close")
            .and_then(|c| Decimal::from_f64_retain(*c))
        {
            Some(price) if price > Decimal::ZERO => price,
            _ => {
                let reason = "signal carries no usable close price".to_string();
                self.bump_error(live, &reason).await;
                return ExecutionResult::failed(now, reason);
            }
        };

        // Portfolio snapshot for sizing and risk projection.
        let snapshot = match tokio::time::timeout(
            Duration::from_secs(BROKER_TIMEOUT_SECS),
            snapshot_portfolio(broker.as_ref(), self.deps.peaks.peak(&live.owner)),
        )
        .await
        {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                let reason = format!("portfolio snapshot failed: {e}");
                self.bump_error(live, &reason).await;
                return ExecutionResult::failed(now, reason);
            }
            Err(_) => {
                let reason = format!("portfolio snapshot timed out after {BROKER_TIMEOUT_SECS} s");
                self.bump_error(live, &reason).await;
                return ExecutionResult::failed(now, reason);
            }
        };
        self.deps
            .peaks
            .observe(&live.owner, snapshot.account_value);

        // Quantity: explicit override, held quantity for exits, sizing
        // otherwise.
        let mut quantity = match (opts.quantity, side) {
            (Some(quantity), _) => quantity,
            (None, OrderSide::Sell) => {
                let held = snapshot
                    .positions
                    .iter()
                    .find(|p| p.symbol == signal.symbol)
                    .map(|p| p.quantity)
                    .unwrap_or(Decimal::ZERO);
                if held <= Decimal::ZERO {
                    return ExecutionResult::failed(now, "no position to close");
                }
                held
            }
            (None, OrderSide::Buy) => {
                let sized = position_size(&SizingInputs {
                    entry_price: price,
                    stop_loss: None,
                    position_size_pct: live.position_size_pct,
                    max_position_size: live.max_position_size,
                    risk_per_trade: self.risk_settings.risk_per_trade,
                    buying_power: snapshot.buying_power,
                    equity: snapshot.account_value,
                });
                if sized.quantity < Decimal::ONE {
                    let reason = sized.reason.unwrap_or_else(|| "below minimum".into());
                    return ExecutionResult::failed(now, reason);
                }
                sized.quantity
            }
        };

        // Pre-trade risk evaluation.
        let rules = match self
            .deps
            .store
            .rules_for(&live.owner, Some(live.strategy_id))
            .await
        {
            Ok(rules) => rules,
            Err(e) => {
                let reason = format!("cannot load risk rules: {e}");
                self.bump_error(live, &reason).await;
                return ExecutionResult::failed(now, reason);
            }
        };
        let proposal = TradeProposal {
            symbol: signal.symbol.clone(),
            side,
            quantity,
            estimated_price: price,
        };
        let verdict = evaluate(&rules, &snapshot, &proposal);

        if !verdict.breaches.is_empty() {
            let breached: Vec<_> = verdict
                .breached_rule_ids()
                .into_iter()
                .map(|id| (id, now))
                .collect();
            if let Err(e) = self.deps.store.record_breaches(&breached).await {
                warn!(error = %e, "failed to persist breach bookkeeping");
            }
        }
        if let Some(priority) = verdict.notification_priority() {
            self.deps
                .notifier
                .notify(
                    Notification::new(
                        &live.owner,
                        NotificationKind::RiskBreach,
                        priority,
                        "Risk rule evaluation",
                        &verdict.reason,
                    )
                    .with_data(serde_json::json!({
                        "live_strategy_id": live.id,
                        "symbol": signal.symbol,
                    })),
                )
                .await;
        }

        match verdict.decision {
            RiskDecision::Approve | RiskDecision::Alert => {}
            RiskDecision::ReduceSize {
                quantity: reduced,
            } if reduced >= Decimal::ONE => {
                info!(
                    symbol = %signal.symbol,
                    from = %quantity,
                    to = %reduced,
                    "risk manager reduced order size"
                );
                quantity = reduced;
            }
            _ => {
                // Block, Close*, or a reduction to zero.
                self.audit_error(live, signal, &verdict.reason, false).await;
                return ExecutionResult::failed(now, verdict.reason);
            }
        }

        if opts.dry_run {
            self.audit_signal(live, signal, quantity, price).await;
            return ExecutionResult {
                dry_run: true,
                quantity: Some(quantity),
                ..ExecutionResult::ok(now)
            };
        }

        // Broker budget: starve → defer, don't fail.
        if !self.deps.rate_limiter.try_acquire(&live.owner) {
            info!(owner = %live.owner, symbol = %signal.symbol, "broker rate limit, deferring order");
            return ExecutionResult::deferred(now);
        }

        self.audit_signal(live, signal, quantity, price).await;

        // Submit with back-off on transient faults; 4xx-class errors are
        // terminal.
        let request = OrderRequest::market(&signal.symbol, side, quantity);
        let mut attempt = 0u32;
        let order = loop {
            attempt += 1;
            if cancel.is_cancelled() {
                return ExecutionResult::failed(now, "cancelled before submission");
            }

            let fault = match tokio::time::timeout(
                Duration::from_secs(BROKER_TIMEOUT_SECS),
                broker.place_order(&request),
            )
            .await
            {
                Ok(Ok(order)) => break order,
                Ok(Err(e)) => e,
                Err(_) => BrokerError::Timeout {
                    seconds: BROKER_TIMEOUT_SECS,
                },
            };

            if !fault.is_transient() {
                let reason = format!("broker rejected order: {fault}");
                self.audit_error(live, signal, &reason, true).await;
                self.deps
                    .notifier
                    .notify(Notification::new(
                        &live.owner,
                        NotificationKind::StrategyError,
                        NotificationPriority::Medium,
                        "Order rejected",
                        &reason,
                    ))
                    .await;
                return ExecutionResult::failed(now, reason);
            }
            if attempt >= self.retry.max_attempts {
                let reason =
                    format!("broker unavailable after {attempt} attempts: {fault}");
                self.bump_error(live, &reason).await;
                return ExecutionResult::failed(now, reason);
            }

            let delay = self.retry.delay_ms(attempt);
            warn!(
                symbol = %signal.symbol,
                attempt,
                delay_ms = delay,
                error = %fault,
                "transient broker fault, backing off"
            );
            tokio::time::sleep(Duration::from_millis(delay)).await;
        };

        // The broker accepted the order: audit entry and counter bump are
        // mandatory from here on, cancellation or not.
        let mut stored_order = order.clone();
        stored_order.live_strategy_id = Some(live.id);
        if let Err(e) = self.deps.store.insert_order(stored_order).await {
            error!(order_id = %order.id, error = %e, "failed to persist order");
        }

        let order_audit = AuditRecord::new(&live.owner, AuditEvent::Order, self.deps.clock.now())
            .with_strategy(live.id)
            .with_symbol(&signal.symbol)
            .with_side(side)
            .with_quantity(quantity)
            .with_order_id(&order.id)
            .with_details(serde_json::json!({ "signal_id": signal.id }));
        if let Err(e) = self
            .deps
            .store
            .append_audit_with_diff(
                order_audit,
                live.id,
                LiveStrategyDiff::trade(self.deps.clock.now()),
            )
            .await
        {
            error!(order_id = %order.id, error = %e, "failed to persist order audit");
        }

        if let Err(e) = self
            .deps
            .store
            .mark_signal_executed(signal.id, &order.id)
            .await
        {
            error!(signal_id = %signal.id, error = %e, "failed to mark signal executed");
        }

        if let Some(fill_price) = order.fill_price {
            let fill_audit =
                AuditRecord::new(&live.owner, AuditEvent::Fill, self.deps.clock.now())
                    .with_strategy(live.id)
                    .with_symbol(&signal.symbol)
                    .with_side(side)
                    .with_quantity(quantity)
                    .with_price(fill_price)
                    .with_order_id(&order.id);
            if let Err(e) = self.deps.store.append_audit(fill_audit).await {
                error!(order_id = %order.id, error = %e, "failed to persist fill audit");
            }
        }

        self.deps
            .notifier
            .notify(
                Notification::new(
                    &live.owner,
                    NotificationKind::Trade,
                    NotificationPriority::Medium,
                    "Order submitted",
                    &format!(
                        "{side} {quantity} {} via {}",
                        signal.symbol, live.name
                    ),
                )
                .with_data(serde_json::json!({ "order_id": order.id })),
            )
            .await;

        info!(
            order_id = %order.id,
            symbol = %signal.symbol,
            side = %side,
            quantity = %quantity,
            "signal executed"
        );

        ExecutionResult {
            success: true,
            order_id: Some(order.id.clone()),
            execution_price: order.fill_price,
            quantity: Some(quantity),
            dry_run: false,
            deferred: false,
            error: None,
            timestamp: now,
        }
    }

    /// Audit `event_type = signal` for a signal accepted for execution.
    async fn audit_signal(
        &self,
        live: &LiveStrategy,
        signal: &SignalRecord,
        quantity: Decimal,
        price: Decimal,
    ) {
        let record = AuditRecord::new(&live.owner, AuditEvent::Signal, self.deps.clock.now())
            .with_strategy(live.id)
            .with_symbol(&signal.symbol)
            .with_side(match signal.signal_type {
                SignalType::Sell => OrderSide::Sell,
                _ => OrderSide::Buy,
            })
            .with_quantity(quantity)
            .with_price(price)
            .with_details(serde_json::json!({
                "signal_id": signal.id,
                "strength": signal.strength,
                "reasoning": signal.reasoning,
            }));
        if let Err(e) = self.deps.store.append_audit(record).await {
            error!(signal_id = %signal.id, error = %e, "failed to persist signal audit");
        }
    }

    /// Audit `event_type = error`, optionally bumping the strategy's error
    /// counter (risk blocks are policy outcomes, not errors).
    async fn audit_error(
        &self,
        live: &LiveStrategy,
        signal: &SignalRecord,
        reason: &str,
        count_as_error: bool,
    ) {
        let record = AuditRecord::new(&live.owner, AuditEvent::Error, self.deps.clock.now())
            .with_strategy(live.id)
            .with_symbol(&signal.symbol)
            .with_details(serde_json::json!({
                "signal_id": signal.id,
                "reason": reason,
            }));

        let result = if count_as_error {
            self.deps
                .store
                .append_audit_with_diff(record, live.id, LiveStrategyDiff::error(reason))
                .await
                .map(|_| ())
        } else {
            self.deps.store.append_audit(record).await
        };
        if let Err(e) = result {
            error!(error = %e, "failed to persist error audit");
        }
    }

    async fn bump_error(&self, live: &LiveStrategy, reason: &str) {
        if let Err(e) = self
            .deps
            .store
            .apply_strategy_diff(live.id, LiveStrategyDiff::error(reason))
            .await
        {
            error!(error = %e, "failed to persist error counter");
        }
    }
}
