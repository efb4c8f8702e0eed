//! Live trading control plane for Tradewind.
//!
//! Ties the state store, market data, indicator/signal pipeline, risk
//! manager, and broker together: the [`scheduler::StrategyScheduler`] wakes
//! due strategies, the [`pipeline`] evaluates them symbol by symbol, and the
//! [`executor::SignalExecutor`] turns actionable signals into risk-checked,
//! audit-logged orders.

pub mod broker;
pub mod control;
pub mod executor;
pub mod paper;
pub mod pipeline;
pub mod ratelimit;
pub mod scheduler;

pub use broker::{snapshot_portfolio, Account, BrokerClient, BrokerPosition, BrokerRouter};
pub use control::{
    ControlPlane, ControlPlaneDeps, Dashboard, QuickDeployRequest, RunOptimizationRequest,
};
pub use executor::{ExecutionResult, ExecutorDeps, ExecutorOpts, PeakTracker, SignalExecutor};
pub use paper::{PaperBroker, PaperBrokerConfig};
pub use pipeline::{run_check, CheckDeps, CheckReport};
pub use ratelimit::{OwnerRateLimiter, RateLimiterConfig};
pub use scheduler::{StrategyScheduler, TickSummary};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag observed by workers at every suspension
/// point.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-symbol market-data fetch budget (seconds).
pub const MARKET_DATA_TIMEOUT_SECS: u64 = 10;
/// Broker call budget (seconds).
pub const BROKER_TIMEOUT_SECS: u64 = 15;
/// State store write budget (seconds).
pub const STORE_TIMEOUT_SECS: u64 = 5;
