//! State persistence contract and the in-memory reference implementation.
//!
//! The store is the single writer of LiveStrategy counters: scheduler,
//! executor, and risk manager pass [`LiveStrategyDiff`]s and the store
//! serialises the writes. `append_audit_with_diff` persists an audit record
//! and the counter bump as one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use uuid::Uuid;

use tw_types::{
    AuditRecord, LiveStatus, LiveStrategy, LiveStrategyDiff, OptimizationJob, Order, RiskRule,
    SignalRecord, StoreError, Strategy,
};

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// CRUD + queries over the §3.1 collections.
#[async_trait]
pub trait StateStore: Send + Sync {
    // -- strategy templates -------------------------------------------------

    async fn insert_strategy(&self, strategy: Strategy) -> StoreResult<()>;
    async fn get_strategy(&self, id: Uuid) -> StoreResult<Strategy>;
    async fn strategies_for_owner(&self, owner: &str) -> StoreResult<Vec<Strategy>>;

    // -- live strategies ----------------------------------------------------

    async fn insert_live_strategy(&self, live: LiveStrategy) -> StoreResult<()>;
    async fn get_live_strategy(&self, id: Uuid) -> StoreResult<LiveStrategy>;
    /// Full replace, used by the control surface for status transitions.
    async fn update_live_strategy(&self, live: LiveStrategy) -> StoreResult<()>;
    /// Delete the instance and cascade to its signals and orders.
    async fn delete_live_strategy(&self, id: Uuid) -> StoreResult<()>;
    /// Query by `(status, owner)`; either filter may be absent.
    async fn list_live_strategies(
        &self,
        status: Option<LiveStatus>,
        owner: Option<&str>,
    ) -> StoreResult<Vec<LiveStrategy>>;
    /// Serialised counter bump. Returns the updated row.
    async fn apply_strategy_diff(
        &self,
        id: Uuid,
        diff: LiveStrategyDiff,
    ) -> StoreResult<LiveStrategy>;

    // -- signals ------------------------------------------------------------

    async fn insert_signal(&self, signal: SignalRecord) -> StoreResult<()>;
    async fn mark_signal_executed(&self, id: Uuid, order_id: &str) -> StoreResult<()>;
    /// Most recent first, per the `(live_strategy_id, timestamp DESC)` index.
    async fn signals_for(
        &self,
        live_strategy_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<SignalRecord>>;

    // -- orders -------------------------------------------------------------

    async fn insert_order(&self, order: Order) -> StoreResult<()>;
    async fn get_order(&self, id: &str) -> StoreResult<Order>;

    // -- risk rules ---------------------------------------------------------

    async fn insert_risk_rule(&self, rule: RiskRule) -> StoreResult<()>;
    /// Active rules for an owner: global rules plus those scoped to
    /// `strategy_id`.
    async fn rules_for(
        &self,
        owner: &str,
        strategy_id: Option<Uuid>,
    ) -> StoreResult<Vec<RiskRule>>;
    async fn record_breaches(&self, breached: &[(Uuid, DateTime<Utc>)]) -> StoreResult<()>;

    // -- audit log ----------------------------------------------------------

    async fn append_audit(&self, record: AuditRecord) -> StoreResult<()>;
    /// Transactional write of one audit record plus a LiveStrategy diff.
    async fn append_audit_with_diff(
        &self,
        record: AuditRecord,
        strategy_id: Uuid,
        diff: LiveStrategyDiff,
    ) -> StoreResult<LiveStrategy>;
    async fn audit_for_owner(
        &self,
        owner: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AuditRecord>>;
    async fn audit_for_order(&self, order_id: &str) -> StoreResult<Vec<AuditRecord>>;

    // -- optimisation jobs --------------------------------------------------

    async fn insert_job(&self, job: OptimizationJob) -> StoreResult<()>;
    async fn update_job(&self, job: OptimizationJob) -> StoreResult<()>;
    async fn get_job(&self, id: Uuid) -> StoreResult<OptimizationJob>;
}

#[derive(Debug, Default)]
struct Collections {
    strategies: HashMap<Uuid, Strategy>,
    live: HashMap<Uuid, LiveStrategy>,
    signals: Vec<SignalRecord>,
    orders: HashMap<String, Order>,
    rules: HashMap<Uuid, RiskRule>,
    audit: Vec<AuditRecord>,
    jobs: HashMap<Uuid, OptimizationJob>,
}

/// In-memory store. One mutex over all collections makes the
/// audit-plus-diff write trivially transactional.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    inner: Mutex<Collections>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply_diff_locked(
        collections: &mut Collections,
        id: Uuid,
        diff: &LiveStrategyDiff,
    ) -> StoreResult<LiveStrategy> {
        let live = collections
            .live
            .get_mut(&id)
            .ok_or(StoreError::NotFound {
                entity: "LiveStrategy",
                id: id.to_string(),
            })?;
        live.apply_diff(diff);
        Ok(live.clone())
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn insert_strategy(&self, strategy: Strategy) -> StoreResult<()> {
        self.inner.lock().strategies.insert(strategy.id, strategy);
        Ok(())
    }

    async fn get_strategy(&self, id: Uuid) -> StoreResult<Strategy> {
        self.inner
            .lock()
            .strategies
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "Strategy",
                id: id.to_string(),
            })
    }

    async fn strategies_for_owner(&self, owner: &str) -> StoreResult<Vec<Strategy>> {
        Ok(self
            .inner
            .lock()
            .strategies
            .values()
            .filter(|s| s.owner == owner)
            .cloned()
            .collect())
    }

    async fn insert_live_strategy(&self, live: LiveStrategy) -> StoreResult<()> {
        self.inner.lock().live.insert(live.id, live);
        Ok(())
    }

    async fn get_live_strategy(&self, id: Uuid) -> StoreResult<LiveStrategy> {
        self.inner
            .lock()
            .live
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "LiveStrategy",
                id: id.to_string(),
            })
    }

    async fn update_live_strategy(&self, live: LiveStrategy) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.live.contains_key(&live.id) {
            return Err(StoreError::NotFound {
                entity: "LiveStrategy",
                id: live.id.to_string(),
            });
        }
        inner.live.insert(live.id, live);
        Ok(())
    }

    async fn delete_live_strategy(&self, id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.live.remove(&id).ok_or(StoreError::NotFound {
            entity: "LiveStrategy",
            id: id.to_string(),
        })?;
        // Cascade: signals and orders belong to the instance.
        inner.signals.retain(|s| s.live_strategy_id != id);
        inner
            .orders
            .retain(|_, o| o.live_strategy_id != Some(id));
        Ok(())
    }

    async fn list_live_strategies(
        &self,
        status: Option<LiveStatus>,
        owner: Option<&str>,
    ) -> StoreResult<Vec<LiveStrategy>> {
        Ok(self
            .inner
            .lock()
            .live
            .values()
            .filter(|l| status.map_or(true, |s| l.status == s))
            .filter(|l| owner.map_or(true, |o| l.owner == o))
            .cloned()
            .collect())
    }

    async fn apply_strategy_diff(
        &self,
        id: Uuid,
        diff: LiveStrategyDiff,
    ) -> StoreResult<LiveStrategy> {
        let mut inner = self.inner.lock();
        Self::apply_diff_locked(&mut inner, id, &diff)
    }

    async fn insert_signal(&self, signal: SignalRecord) -> StoreResult<()> {
        self.inner.lock().signals.push(signal);
        Ok(())
    }

    async fn mark_signal_executed(&self, id: Uuid, order_id: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let signal = inner
            .signals
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(StoreError::NotFound {
                entity: "SignalRecord",
                id: id.to_string(),
            })?;
        signal.executed = true;
        signal.order_id = Some(order_id.to_string());
        Ok(())
    }

    async fn signals_for(
        &self,
        live_strategy_id: Uuid,
        limit: usize,
    ) -> StoreResult<Vec<SignalRecord>> {
        let mut matching: Vec<SignalRecord> = self
            .inner
            .lock()
            .signals
            .iter()
            .filter(|s| s.live_strategy_id == live_strategy_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        matching.truncate(limit);
        Ok(matching)
    }

    async fn insert_order(&self, order: Order) -> StoreResult<()> {
        self.inner.lock().orders.insert(order.id.clone(), order);
        Ok(())
    }

    async fn get_order(&self, id: &str) -> StoreResult<Order> {
        self.inner
            .lock()
            .orders
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "Order",
                id: id.to_string(),
            })
    }

    async fn insert_risk_rule(&self, rule: RiskRule) -> StoreResult<()> {
        self.inner.lock().rules.insert(rule.id, rule);
        Ok(())
    }

    async fn rules_for(
        &self,
        owner: &str,
        strategy_id: Option<Uuid>,
    ) -> StoreResult<Vec<RiskRule>> {
        Ok(self
            .inner
            .lock()
            .rules
            .values()
            .filter(|r| r.owner == owner && r.applies_to(strategy_id))
            .cloned()
            .collect())
    }

    async fn record_breaches(&self, breached: &[(Uuid, DateTime<Utc>)]) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        for (rule_id, at) in breached {
            if let Some(rule) = inner.rules.get_mut(rule_id) {
                rule.breach_count += 1;
                rule.last_breach_at = Some(*at);
            }
        }
        Ok(())
    }

    async fn append_audit(&self, record: AuditRecord) -> StoreResult<()> {
        self.inner.lock().audit.push(record);
        Ok(())
    }

    async fn append_audit_with_diff(
        &self,
        record: AuditRecord,
        strategy_id: Uuid,
        diff: LiveStrategyDiff,
    ) -> StoreResult<LiveStrategy> {
        let mut inner = self.inner.lock();
        let updated = Self::apply_diff_locked(&mut inner, strategy_id, &diff)?;
        inner.audit.push(record);
        Ok(updated)
    }

    async fn audit_for_owner(
        &self,
        owner: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> StoreResult<Vec<AuditRecord>> {
        Ok(self
            .inner
            .lock()
            .audit
            .iter()
            .filter(|r| r.owner == owner && r.timestamp >= from && r.timestamp <= to)
            .cloned()
            .collect())
    }

    async fn audit_for_order(&self, order_id: &str) -> StoreResult<Vec<AuditRecord>> {
        Ok(self
            .inner
            .lock()
            .audit
            .iter()
            .filter(|r| r.order_id.as_deref() == Some(order_id))
            .cloned()
            .collect())
    }

    async fn insert_job(&self, job: OptimizationJob) -> StoreResult<()> {
        self.inner.lock().jobs.insert(job.id, job);
        Ok(())
    }

    async fn update_job(&self, job: OptimizationJob) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        if !inner.jobs.contains_key(&job.id) {
            return Err(StoreError::NotFound {
                entity: "OptimizationJob",
                id: job.id.to_string(),
            });
        }
        inner.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<OptimizationJob> {
        self.inner
            .lock()
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound {
                entity: "OptimizationJob",
                id: id.to_string(),
            })
    }
}
