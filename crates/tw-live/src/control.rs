//! Control surface exposed to the (out-of-scope) HTTP layer.
//!
//! Everything here is a thin, validated read-through to the state store,
//! the risk metrics, and the optimiser. Deployments created here are
//! picked up by the scheduler on its next tick without a restart.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use tw_data::StateStore;
use tw_optimizer::{DeployPlan, Optimizer};
use tw_risk::PortfolioRiskView;
use tw_types::{
    Clock, CoreConfig, JobStatus, LiveStatus, LiveStrategy, OptimizationJob, TwError, TwResult,
};

use crate::broker::{snapshot_portfolio, BrokerRouter};
use crate::executor::PeakTracker;

/// Parameters of the quick-deploy path. Unset fields take the documented
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickDeployRequest {
    pub strategy_id: Uuid,
    pub symbols: Vec<String>,
    pub name: Option<String>,
    pub check_interval_secs: Option<u64>,
    pub auto_execute: Option<bool>,
    pub max_positions: Option<u32>,
    pub position_size_pct: Option<Decimal>,
    pub max_position_size: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
}

impl QuickDeployRequest {
    pub fn new(strategy_id: Uuid, symbols: Vec<String>) -> Self {
        Self {
            strategy_id,
            symbols,
            name: None,
            check_interval_secs: None,
            auto_execute: None,
            max_positions: None,
            position_size_pct: None,
            max_position_size: None,
            daily_loss_limit: None,
        }
    }

    fn from_plan(plan: &DeployPlan) -> Self {
        Self {
            strategy_id: plan.strategy_id,
            symbols: vec![plan.symbol.clone()],
            name: Some(plan.name.clone()),
            check_interval_secs: Some(plan.check_interval_secs),
            auto_execute: Some(plan.auto_execute),
            max_positions: Some(plan.max_positions),
            position_size_pct: Some(plan.position_size_pct),
            max_position_size: None,
            daily_loss_limit: None,
        }
    }
}

/// Parameters of an optimisation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptimizationRequest {
    pub owner: String,
    pub symbols: Vec<String>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: Decimal,
    /// Empty = every strategy the owner has.
    pub strategy_ids: Vec<Uuid>,
}

/// Owner dashboard: deployments plus the portfolio risk view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
    pub strategies: Vec<LiveStrategy>,
    pub risk: PortfolioRiskView,
}

/// Collaborators of the control plane.
pub struct ControlPlaneDeps {
    pub store: Arc<dyn StateStore>,
    pub brokers: Arc<BrokerRouter>,
    pub clock: Arc<dyn Clock>,
    pub peaks: Arc<PeakTracker>,
    pub optimizer: Arc<Optimizer>,
}

/// The operator-facing API of the core.
pub struct ControlPlane {
    deps: ControlPlaneDeps,
    config: CoreConfig,
}

impl ControlPlane {
    pub fn new(deps: ControlPlaneDeps, config: CoreConfig) -> Self {
        Self { deps, config }
    }

    /// Create and activate a live strategy in one step. The scheduler picks
    /// it up on its next tick.
    pub async fn quick_deploy(&self, request: QuickDeployRequest) -> TwResult<LiveStrategy> {
        let strategy = self.deps.store.get_strategy(request.strategy_id).await?;

        if !self.deps.brokers.has_credentials(&strategy.owner) {
            return Err(TwError::Validation(format!(
                "owner {} has no broker credentials",
                strategy.owner
            )));
        }

        let symbols = if request.symbols.is_empty() {
            strategy.symbols.clone()
        } else {
            request.symbols.clone()
        };
        let name = request
            .name
            .clone()
            .unwrap_or_else(|| format!("{} (auto)", strategy.name));

        let mut live = LiveStrategy::new(&strategy.owner, strategy.id, &name, symbols);
        live.status = LiveStatus::Active;
        live.check_interval_secs = request.check_interval_secs.unwrap_or(300);
        live.auto_execute = request.auto_execute.unwrap_or(true);
        live.max_positions = request.max_positions.unwrap_or(5);
        live.position_size_pct = request
            .position_size_pct
            .unwrap_or(self.config.risk.default_position_size_pct);
        live.max_position_size = request.max_position_size;
        live.daily_loss_limit = request.daily_loss_limit;

        live.validate(self.config.scheduler.min_check_interval_seconds)
            .map_err(TwError::Validation)?;

        self.deps.store.insert_live_strategy(live.clone()).await?;
        info!(
            live_id = %live.id,
            strategy = %strategy.name,
            owner = %strategy.owner,
            symbols = live.symbols.len(),
            "quick-deployed live strategy"
        );
        Ok(live)
    }

    /// Activate a paused, stopped, or errored strategy. Idempotent on
    /// ACTIVE. Cumulative counters are preserved across transitions.
    pub async fn start_strategy(&self, id: Uuid) -> TwResult<LiveStrategy> {
        let mut live = self.deps.store.get_live_strategy(id).await?;
        if live.status == LiveStatus::Active {
            return Ok(live);
        }

        if !self.deps.brokers.has_credentials(&live.owner) {
            return Err(TwError::Validation(format!(
                "owner {} has no broker credentials",
                live.owner
            )));
        }
        live.validate(self.config.scheduler.min_check_interval_seconds)
            .map_err(TwError::Validation)?;

        live.status = LiveStatus::Active;
        live.last_error = None;
        self.deps.store.update_live_strategy(live.clone()).await?;
        info!(live_id = %id, "strategy started");
        Ok(live)
    }

    /// Pause an active strategy. Idempotent on PAUSED.
    pub async fn pause_strategy(&self, id: Uuid) -> TwResult<LiveStrategy> {
        let mut live = self.deps.store.get_live_strategy(id).await?;
        match live.status {
            LiveStatus::Paused => Ok(live),
            LiveStatus::Active => {
                live.status = LiveStatus::Paused;
                self.deps.store.update_live_strategy(live.clone()).await?;
                info!(live_id = %id, "strategy paused");
                Ok(live)
            }
            other => Err(TwError::Validation(format!(
                "cannot pause a strategy in state {other}"
            ))),
        }
    }

    /// Stop a strategy from any state. Idempotent.
    pub async fn stop_strategy(&self, id: Uuid) -> TwResult<LiveStrategy> {
        let mut live = self.deps.store.get_live_strategy(id).await?;
        if live.status != LiveStatus::Stopped {
            live.status = LiveStatus::Stopped;
            self.deps.store.update_live_strategy(live.clone()).await?;
            info!(live_id = %id, "strategy stopped");
        }
        Ok(live)
    }

    pub async fn list_active_strategies(&self, owner: &str) -> TwResult<Vec<LiveStrategy>> {
        Ok(self
            .deps
            .store
            .list_live_strategies(Some(LiveStatus::Active), Some(owner))
            .await?)
    }

    /// Owner dashboard. A failing account fetch yields a zero-filled risk
    /// view with the error attached. The dashboard never errors out.
    pub async fn dashboard(&self, owner: &str) -> TwResult<Dashboard> {
        let strategies = self.deps.store.list_live_strategies(None, Some(owner)).await?;

        let risk = match self.deps.brokers.get(owner) {
            None => PortfolioRiskView::unavailable("no broker registered"),
            Some(broker) => {
                match snapshot_portfolio(broker.as_ref(), self.deps.peaks.peak(owner)).await {
                    Ok(snapshot) => {
                        self.deps.peaks.observe(owner, snapshot.account_value);
                        PortfolioRiskView::from_snapshot(&snapshot)
                    }
                    Err(e) => PortfolioRiskView::unavailable(&e.to_string()),
                }
            }
        };

        Ok(Dashboard { strategies, risk })
    }

    /// Kick off an asynchronous optimisation job. The returned record is
    /// PENDING; poll it by id.
    pub async fn run_optimization(
        &self,
        request: RunOptimizationRequest,
    ) -> TwResult<OptimizationJob> {
        if request.symbols.is_empty() {
            return Err(TwError::Validation("symbol list must be non-empty".into()));
        }
        if request.start_date >= request.end_date {
            return Err(TwError::Validation(format!(
                "start date {} is not before end date {}",
                request.start_date, request.end_date
            )));
        }
        if request.initial_capital <= Decimal::ZERO {
            return Err(TwError::Validation(
                "initial capital must be positive".into(),
            ));
        }

        let job = OptimizationJob::new(
            &request.owner,
            request.symbols,
            request.strategy_ids,
            request.start_date,
            request.end_date,
            request.initial_capital,
        );
        self.deps.store.insert_job(job.clone()).await?;

        let optimizer = self.deps.optimizer.clone();
        let background = job.clone();
        tokio::spawn(async move {
            if let Err(e) = optimizer.run(background).await {
                tracing::error!(error = %e, "optimisation job crashed");
            }
        });

        Ok(job)
    }

    /// Quick-deploy the top `n` winners of a completed optimisation job.
    pub async fn execute_optimal(&self, job_id: Uuid, top_n: usize) -> TwResult<Vec<LiveStrategy>> {
        let job = self.deps.store.get_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(TwError::Validation(format!(
                "job {job_id} is not completed"
            )));
        }

        let mut deployed = Vec::new();
        for plan in Optimizer::plans_for_top(&job, top_n) {
            deployed.push(
                self.quick_deploy(QuickDeployRequest::from_plan(&plan))
                    .await?,
            );
        }
        Ok(deployed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::PeakTracker;
    use crate::paper::PaperBroker;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use tw_data::{synthetic, MemoryDataSource, MemoryStateStore};
    use tw_optimizer::OptimizerDeps;
    use tw_types::{
        CollectingSink, LiveStrategyDiff, Parameters, Strategy, StrategyType, SystemClock,
        Timeframe,
    };

    struct Fixture {
        control: ControlPlane,
        store: Arc<MemoryStateStore>,
        brokers: Arc<BrokerRouter>,
        strategy: Strategy,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let brokers = Arc::new(BrokerRouter::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let peaks = Arc::new(PeakTracker::new());

        let data = Arc::new(MemoryDataSource::new());
        data.insert(
            "AAPL",
            Timeframe::OneDay,
            synthetic::random_walk(
                "AAPL",
                Utc::now() - ChronoDuration::days(400),
                300,
                100.0,
                5,
            ),
        );

        brokers.register("alice", Arc::new(PaperBroker::with_defaults()));

        let strategy = Strategy::new("alice", "dip buyer", StrategyType::Rsi)
            .with_parameters(Parameters::new().with("period", 14));
        store.insert_strategy(strategy.clone()).await.unwrap();

        let optimizer = Arc::new(Optimizer::new(
            OptimizerDeps {
                data,
                store: store.clone(),
                notifier: Arc::new(CollectingSink::new()),
                clock: clock.clone(),
            },
            2,
        ));

        let control = ControlPlane::new(
            ControlPlaneDeps {
                store: store.clone(),
                brokers: brokers.clone(),
                clock,
                peaks,
                optimizer,
            },
            CoreConfig::default(),
        );

        Fixture {
            control,
            store,
            brokers,
            strategy,
        }
    }

    #[tokio::test]
    async fn test_quick_deploy_defaults() {
        let f = fixture().await;
        let live = f
            .control
            .quick_deploy(QuickDeployRequest::new(
                f.strategy.id,
                vec!["AAPL".into()],
            ))
            .await
            .unwrap();

        assert_eq!(live.status, LiveStatus::Active);
        assert_eq!(live.check_interval_secs, 300);
        assert!(live.auto_execute);
        assert_eq!(live.max_positions, 5);
        assert_eq!(live.position_size_pct, dec!(0.02));

        // Persisted and discoverable by the scheduler's index.
        let active = f.control.list_active_strategies("alice").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, live.id);
    }

    #[tokio::test]
    async fn test_quick_deploy_requires_credentials() {
        let f = fixture().await;
        let strategy = Strategy::new("mallory", "no creds", StrategyType::Rsi);
        f.store.insert_strategy(strategy.clone()).await.unwrap();

        let err = f
            .control
            .quick_deploy(QuickDeployRequest::new(strategy.id, vec!["AAPL".into()]))
            .await
            .unwrap_err();
        assert!(matches!(err, TwError::Validation(_)));
    }

    #[tokio::test]
    async fn test_quick_deploy_rejects_fast_cadence() {
        let f = fixture().await;
        let mut request = QuickDeployRequest::new(f.strategy.id, vec!["AAPL".into()]);
        request.check_interval_secs = Some(30);

        let err = f.control.quick_deploy(request).await.unwrap_err();
        assert!(matches!(err, TwError::Validation(_)));
    }

    #[tokio::test]
    async fn test_quick_deploy_rejects_empty_symbols() {
        let f = fixture().await;
        // Neither the request nor the template has symbols.
        let err = f
            .control
            .quick_deploy(QuickDeployRequest::new(f.strategy.id, Vec::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, TwError::Validation(_)));
    }

    #[tokio::test]
    async fn test_stop_start_round_trip_preserves_counters() {
        let f = fixture().await;
        let live = f
            .control
            .quick_deploy(QuickDeployRequest::new(
                f.strategy.id,
                vec!["AAPL".into()],
            ))
            .await
            .unwrap();

        // Simulate some execution history.
        let now = Utc::now();
        f.store
            .apply_strategy_diff(live.id, LiveStrategyDiff::signal(now))
            .await
            .unwrap();
        f.store
            .apply_strategy_diff(live.id, LiveStrategyDiff::trade(now))
            .await
            .unwrap();

        let stopped = f.control.stop_strategy(live.id).await.unwrap();
        assert_eq!(stopped.status, LiveStatus::Stopped);

        let restarted = f.control.start_strategy(live.id).await.unwrap();
        assert_eq!(restarted.status, LiveStatus::Active);
        assert_eq!(restarted.total_signals, 1);
        assert_eq!(restarted.executed_trades, 1);
    }

    #[tokio::test]
    async fn test_transitions_are_idempotent() {
        let f = fixture().await;
        let live = f
            .control
            .quick_deploy(QuickDeployRequest::new(
                f.strategy.id,
                vec!["AAPL".into()],
            ))
            .await
            .unwrap();

        // start on ACTIVE is a no-op.
        let started = f.control.start_strategy(live.id).await.unwrap();
        assert_eq!(started.status, LiveStatus::Active);

        // pause twice.
        f.control.pause_strategy(live.id).await.unwrap();
        let paused = f.control.pause_strategy(live.id).await.unwrap();
        assert_eq!(paused.status, LiveStatus::Paused);

        // stop twice.
        f.control.stop_strategy(live.id).await.unwrap();
        let stopped = f.control.stop_strategy(live.id).await.unwrap();
        assert_eq!(stopped.status, LiveStatus::Stopped);

        // pausing a stopped strategy is an invalid transition.
        assert!(f.control.pause_strategy(live.id).await.is_err());
    }

    #[tokio::test]
    async fn test_dashboard_with_and_without_broker() {
        let f = fixture().await;
        let dashboard = f.control.dashboard("alice").await.unwrap();
        assert!(dashboard.risk.error.is_none());
        assert_eq!(dashboard.risk.account_value, dec!(100_000));

        let empty = f.control.dashboard("nobody").await.unwrap();
        assert!(empty.strategies.is_empty());
        assert_eq!(empty.risk.account_value, dec!(0));
        assert!(empty.risk.error.is_some());
    }

    #[tokio::test]
    async fn test_run_optimization_validation() {
        let f = fixture().await;
        let bad = RunOptimizationRequest {
            owner: "alice".into(),
            symbols: Vec::new(),
            start_date: Utc::now() - ChronoDuration::days(30),
            end_date: Utc::now(),
            initial_capital: dec!(100_000),
            strategy_ids: Vec::new(),
        };
        assert!(f.control.run_optimization(bad).await.is_err());

        let inverted = RunOptimizationRequest {
            owner: "alice".into(),
            symbols: vec!["AAPL".into()],
            start_date: Utc::now(),
            end_date: Utc::now() - ChronoDuration::days(30),
            initial_capital: dec!(100_000),
            strategy_ids: Vec::new(),
        };
        assert!(f.control.run_optimization(inverted).await.is_err());
    }

    #[tokio::test]
    async fn test_optimization_to_quick_deploy_flow() {
        let f = fixture().await;
        let job = f
            .control
            .run_optimization(RunOptimizationRequest {
                owner: "alice".into(),
                symbols: vec!["AAPL".into()],
                start_date: Utc::now() - ChronoDuration::days(400),
                end_date: Utc::now(),
                initial_capital: dec!(100_000),
                strategy_ids: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Pending);

        // Poll until the background run resolves.
        let mut finished = None;
        for _ in 0..200 {
            let current = f.store.get_job(job.id).await.unwrap();
            if matches!(current.status, JobStatus::Completed | JobStatus::Failed) {
                finished = Some(current);
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        let finished = finished.expect("job never resolved");
        assert_eq!(finished.status, JobStatus::Completed);
        assert!(!finished.results.is_empty());

        // Deploy the winner with the documented defaults.
        let deployed = f.control.execute_optimal(job.id, 1).await.unwrap();
        assert_eq!(deployed.len(), 1);
        let live = &deployed[0];
        assert_eq!(live.status, LiveStatus::Active);
        assert_eq!(live.check_interval_secs, 300);
        assert!(live.auto_execute);
        assert_eq!(live.position_size_pct, dec!(0.02));
        assert_eq!(live.max_positions, 5);
        assert_eq!(live.strategy_id, finished.results[0].strategy_id);
    }

    #[tokio::test]
    async fn test_execute_optimal_requires_completion() {
        let f = fixture().await;
        let job = OptimizationJob::new(
            "alice",
            vec!["AAPL".into()],
            Vec::new(),
            Utc::now() - ChronoDuration::days(30),
            Utc::now(),
            dec!(100_000),
        );
        f.store.insert_job(job.clone()).await.unwrap();

        let err = f.control.execute_optimal(job.id, 1).await.unwrap_err();
        assert!(matches!(err, TwError::Validation(_)));
    }

    #[tokio::test]
    async fn test_start_requires_credentials_still_present() {
        let f = fixture().await;
        let live = f
            .control
            .quick_deploy(QuickDeployRequest::new(
                f.strategy.id,
                vec!["AAPL".into()],
            ))
            .await
            .unwrap();
        f.control.stop_strategy(live.id).await.unwrap();

        // Credentials revoked while stopped: restart must fail.
        f.brokers.unregister("alice");
        let err = f.control.start_strategy(live.id).await.unwrap_err();
        assert!(matches!(err, TwError::Validation(_)));
    }
}
