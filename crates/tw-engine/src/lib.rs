//! Backtesting engine: chronological bar-walk simulation sharing the
//! indicator and signal pipeline with live execution.

pub mod backtest;
pub mod metrics;

pub use backtest::{run_backtest, BacktestConfig, BacktestReport, EquityPoint, RoundTrip};
pub use metrics::compute_metrics;
