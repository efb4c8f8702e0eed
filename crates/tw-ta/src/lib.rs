//! # tw-ta
//!
//! Pure indicator functions and the deterministic signal generator shared
//! by live execution and backtesting.
//!
//! Indicator series are aligned to their input with NaN in the warm-up
//! prefix; every function validates its history up front and reports
//! insufficient data as a typed error so NaN never reaches the signal
//! layer.

pub mod indicators;
pub mod signal;
pub mod snapshot;

pub use signal::{generate, SignalDecision};
pub use snapshot::{build_snapshot, required_history, IndicatorSnapshot};
