use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// All configuration recognised by the core. Every field has a default so a
/// partially specified document deserialises cleanly.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub risk: RiskSettings,
}

/// Scheduler loop configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wall-clock tick period in seconds.
    #[serde(default = "default_tick_period")]
    pub tick_period_seconds: u64,
    /// Bounded worker pool size for per-strategy checks.
    #[serde(default = "default_worker_pool")]
    pub worker_pool_size: usize,
    /// Smallest per-strategy cadence the control surface accepts.
    #[serde(default = "default_min_check_interval")]
    pub min_check_interval_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_period_seconds: default_tick_period(),
            worker_pool_size: default_worker_pool(),
            min_check_interval_seconds: default_min_check_interval(),
        }
    }
}

/// Executor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Exponential back-off parameters for transient broker failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_retry_base_ms")]
    pub base_ms: u64,
    #[serde(default = "default_retry_factor")]
    pub factor: u32,
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: default_retry_base_ms(),
            factor: default_retry_factor(),
            max_attempts: default_retry_max_attempts(),
        }
    }
}

impl RetryConfig {
    /// Back-off delay before retry attempt `attempt` (1-based).
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.base_ms * (self.factor as u64).pow(attempt.saturating_sub(1))
    }
}

/// Optimiser configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// CPU-bound backtest pool size. Defaults to the number of cores.
    #[serde(default = "default_optimizer_pool")]
    pub worker_pool_size: usize,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_optimizer_pool(),
        }
    }
}

/// Risk defaults applied when a live strategy doesn't override them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskSettings {
    /// Fraction of buying power allocated per position.
    #[serde(default = "default_position_size_pct")]
    pub default_position_size_pct: Decimal,
    /// Fraction of equity risked per trade when a stop distance is known.
    #[serde(default = "default_risk_per_trade")]
    pub risk_per_trade: Decimal,
}

impl Default for RiskSettings {
    fn default() -> Self {
        Self {
            default_position_size_pct: default_position_size_pct(),
            risk_per_trade: default_risk_per_trade(),
        }
    }
}

fn default_tick_period() -> u64 {
    60
}

fn default_worker_pool() -> usize {
    8
}

fn default_min_check_interval() -> u64 {
    60
}

fn default_retry_base_ms() -> u64 {
    500
}

fn default_retry_factor() -> u32 {
    2
}

fn default_retry_max_attempts() -> u32 {
    4
}

fn default_optimizer_pool() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_position_size_pct() -> Decimal {
    Decimal::new(2, 2) // 2%
}

fn default_risk_per_trade() -> Decimal {
    Decimal::new(1, 2) // 1%
}
