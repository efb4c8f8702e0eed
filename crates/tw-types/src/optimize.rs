use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::strategy::Parameters;

/// Lifecycle state of an optimisation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Performance metrics of one backtested (symbol, strategy) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_return_pct: f64,
    /// Annualised, 252 trading days, risk-free rate 0.
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    /// Fraction of closed round-trips with positive P&L.
    pub win_rate: f64,
    pub total_trades: u64,
    /// Σ gains / |Σ losses|; `None` when there are no losing trades.
    pub profit_factor: Option<f64>,
}

/// One ranked entry in an optimisation result. Carries everything the
/// quick-deploy path needs to create an ACTIVE live strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub rank: usize,
    pub strategy_id: Uuid,
    pub strategy_name: String,
    pub symbol: String,
    pub parameters: Parameters,
    pub metrics: BacktestMetrics,
    pub composite_score: f64,
}

/// An asynchronous optimisation run over a symbol × strategy grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: Uuid,
    pub owner: String,
    pub symbols: Vec<String>,
    pub strategy_ids: Vec<Uuid>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub initial_capital: Decimal,
    pub status: JobStatus,
    pub results: Vec<RankedResult>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl OptimizationJob {
    pub fn new(
        owner: &str,
        symbols: Vec<String>,
        strategy_ids: Vec<Uuid>,
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        initial_capital: Decimal,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            symbols,
            strategy_ids,
            start_date,
            end_date,
            initial_capital,
            status: JobStatus::Pending,
            results: Vec::new(),
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self, at: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(at);
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>, results: Vec<RankedResult>) {
        self.status = JobStatus::Completed;
        self.finished_at = Some(at);
        self.results = results;
    }

    pub fn mark_failed(&mut self, at: DateTime<Utc>, error: String) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(at);
        self.error = Some(error);
    }

    /// The top `n` ranked results.
    pub fn top(&self, n: usize) -> &[RankedResult] {
        &self.results[..n.min(self.results.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_job() -> OptimizationJob {
        OptimizationJob::new(
            "alice",
            vec!["AAPL".into()],
            vec![Uuid::new_v4()],
            Utc::now() - chrono::Duration::days(90),
            Utc::now(),
            dec!(100_000),
        )
    }

    fn ranked(rank: usize, score: f64) -> RankedResult {
        RankedResult {
            rank,
            strategy_id: Uuid::new_v4(),
            strategy_name: format!("s{rank}"),
            symbol: "AAPL".into(),
            parameters: Parameters::new(),
            metrics: BacktestMetrics {
                total_return_pct: 10.0,
                sharpe_ratio: 1.2,
                max_drawdown_pct: 5.0,
                win_rate: 0.6,
                total_trades: 12,
                profit_factor: Some(1.8),
            },
            composite_score: score,
        }
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = sample_job();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.started_at.is_none());

        let now = Utc::now();
        job.mark_running(now);
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.started_at, Some(now));

        job.mark_completed(now, vec![ranked(1, 0.9), ranked(2, 0.7)]);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.results.len(), 2);
    }

    #[test]
    fn test_job_failure() {
        let mut job = sample_job();
        job.mark_failed(Utc::now(), "all sub-tasks errored".into());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("all sub-tasks errored"));
    }

    #[test]
    fn test_top_n_clamps() {
        let mut job = sample_job();
        job.mark_completed(Utc::now(), vec![ranked(1, 0.9), ranked(2, 0.7)]);
        assert_eq!(job.top(1).len(), 1);
        assert_eq!(job.top(5).len(), 2);
        assert_eq!(job.top(1)[0].rank, 1);
    }
}
