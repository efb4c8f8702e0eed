//! Parallel optimisation runner.
//!
//! Bars are loaded once per symbol, then the symbol × strategy grid fans
//! out on a rayon pool; worker outcomes flow back over a channel. The job
//! record fails only when every sub-task errors.

use crossbeam_channel::unbounded;
use std::sync::Arc;
use tracing::{info, warn};

use tw_data::{BarQuery, MarketDataSource, StateStore};
use tw_engine::{run_backtest, BacktestConfig};
use tw_types::{
    Bar, Clock, Notification, NotificationKind, NotificationPriority, NotificationSink,
    OptimizationJob, Strategy, Timeframe, TwError, TwResult,
};

use crate::plan::DeployPlan;
use crate::score::{rank, Candidate, ScoreWeights};

/// Collaborators the optimiser needs.
pub struct OptimizerDeps {
    pub data: Arc<dyn MarketDataSource>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
}

/// Drives optimisation jobs to completion.
pub struct Optimizer {
    deps: OptimizerDeps,
    pool_size: usize,
    weights: ScoreWeights,
}

type SubTaskOutcome = Result<Candidate, String>;

impl Optimizer {
    pub fn new(deps: OptimizerDeps, pool_size: usize) -> Self {
        Self {
            deps,
            pool_size: pool_size.max(1),
            weights: ScoreWeights::default(),
        }
    }

    /// Run one job to completion and persist every status transition.
    pub async fn run(&self, mut job: OptimizationJob) -> TwResult<OptimizationJob> {
        let strategies = self.resolve_strategies(&job).await;
        let (strategies, errors): (Vec<_>, Vec<_>) =
            strategies.into_iter().partition(Result::is_ok);
        let strategies: Vec<Strategy> = strategies.into_iter().map(Result::unwrap).collect();
        let mut errors: Vec<String> = errors.into_iter().map(Result::unwrap_err).collect();

        if strategies.is_empty() || job.symbols.is_empty() {
            job.mark_failed(
                self.deps.clock.now(),
                format!(
                    "nothing to optimise: {} strategies, {} symbols",
                    strategies.len(),
                    job.symbols.len()
                ),
            );
            self.deps.store.update_job(job.clone()).await?;
            return Ok(job);
        }

        job.mark_running(self.deps.clock.now());
        self.deps.store.update_job(job.clone()).await?;

        // Load each symbol's history once; the grid shares it read-only.
        let mut series: Vec<(String, Arc<Vec<Bar>>)> = Vec::new();
        for symbol in &job.symbols {
            let query = BarQuery::new(symbol, Timeframe::OneDay)
                .range(job.start_date, job.end_date);
            match self.deps.data.get_bars(&query).await {
                Ok(bars) => series.push((symbol.clone(), Arc::new(bars))),
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "optimiser could not load bars");
                    for strategy in &strategies {
                        errors.push(format!("{symbol}/{}: {e}", strategy.name));
                    }
                }
            }
        }

        let grid: Vec<(Strategy, String, Arc<Vec<Bar>>)> = strategies
            .iter()
            .flat_map(|strategy| {
                series
                    .iter()
                    .map(move |(symbol, bars)| (strategy.clone(), symbol.clone(), bars.clone()))
            })
            .collect();

        let initial_capital = job.initial_capital;
        let pool_size = self.pool_size;
        let outcomes: Vec<SubTaskOutcome> = if grid.is_empty() {
            Vec::new()
        } else {
            tokio::task::spawn_blocking(move || run_grid(grid, initial_capital, pool_size))
                .await
                .map_err(|e| TwError::Scheduler(format!("optimiser pool panicked: {e}")))?
        };

        let mut candidates = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(candidate) => candidates.push(candidate),
                Err(e) => errors.push(e),
            }
        }

        let now = self.deps.clock.now();
        if candidates.is_empty() {
            let detail = errors.first().cloned().unwrap_or_else(|| "unknown".into());
            job.mark_failed(
                now,
                format!("all {} sub-tasks failed; first error: {detail}", errors.len()),
            );
        } else {
            let ranked = rank(candidates, self.weights);
            info!(
                job = %job.id,
                results = ranked.len(),
                failed = errors.len(),
                "optimisation finished"
            );
            job.mark_completed(now, ranked);
        }
        self.deps.store.update_job(job.clone()).await?;
        self.notify_owner(&job).await;

        Ok(job)
    }

    /// Deploy plans for the job's top `n` winners.
    pub fn plans_for_top(job: &OptimizationJob, n: usize) -> Vec<DeployPlan> {
        job.top(n).iter().map(DeployPlan::from_result).collect()
    }

    async fn resolve_strategies(&self, job: &OptimizationJob) -> Vec<Result<Strategy, String>> {
        if job.strategy_ids.is_empty() {
            match self.deps.store.strategies_for_owner(&job.owner).await {
                Ok(all) => all.into_iter().map(Ok).collect(),
                Err(e) => vec![Err(format!("cannot list strategies: {e}"))],
            }
        } else {
            let mut resolved = Vec::with_capacity(job.strategy_ids.len());
            for id in &job.strategy_ids {
                resolved.push(
                    self.deps
                        .store
                        .get_strategy(*id)
                        .await
                        .map_err(|e| format!("strategy {id}: {e}")),
                );
            }
            resolved
        }
    }

    async fn notify_owner(&self, job: &OptimizationJob) {
        let (title, body, priority) = match job.status {
            tw_types::JobStatus::Completed => {
                let top = job.results.first();
                let body = match top {
                    Some(best) => format!(
                        "{} candidates ranked; best: {} on {} (score {:.3})",
                        job.results.len(),
                        best.strategy_name,
                        best.symbol,
                        best.composite_score
                    ),
                    None => "optimisation completed with no candidates".into(),
                };
                ("Optimization complete", body, NotificationPriority::Low)
            }
            _ => (
                "Optimization failed",
                job.error.clone().unwrap_or_default(),
                NotificationPriority::Medium,
            ),
        };

        self.deps
            .notifier
            .notify(
                Notification::new(
                    &job.owner,
                    NotificationKind::Optimization,
                    priority,
                    title,
                    &body,
                )
                .with_data(serde_json::json!({ "job_id": job.id })),
            )
            .await;
    }
}

/// CPU-bound part: backtest every grid cell on a bounded rayon pool.
fn run_grid(
    grid: Vec<(Strategy, String, Arc<Vec<Bar>>)>,
    initial_capital: rust_decimal::Decimal,
    pool_size: usize,
) -> Vec<SubTaskOutcome> {
    use rayon::prelude::*;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(pool_size)
        .build();
    let pool = match pool {
        Ok(pool) => pool,
        Err(e) => {
            return grid
                .iter()
                .map(|_| Err(format!("cannot build optimiser pool: {e}")))
                .collect()
        }
    };

    let (tx, rx) = unbounded::<SubTaskOutcome>();
    pool.install(|| {
        grid.par_iter().for_each_with(tx, |tx, (strategy, symbol, bars)| {
            let mut config = BacktestConfig::new(strategy.strategy_type, strategy.parameters.clone());
            config.initial_capital = initial_capital;

            let outcome = run_backtest(&config, bars)
                .map(|report| Candidate {
                    strategy_id: strategy.id,
                    strategy_name: strategy.name.clone(),
                    symbol: symbol.clone(),
                    parameters: strategy.parameters.clone(),
                    metrics: report.metrics,
                })
                .map_err(|e| format!("{symbol}/{}: {e}", strategy.name));
            let _ = tx.send(outcome);
        });
    });

    rx.into_iter().collect()
}
