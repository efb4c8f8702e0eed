//! # tw-optimizer
//!
//! Parallel backtest driver that ranks a user's strategies by composite
//! score over a symbol grid and produces quick-deploy plans for the
//! winners. The optimiser never touches the scheduler; the control surface
//! turns its plans into deployments.

pub mod plan;
pub mod runner;
pub mod score;

pub use plan::DeployPlan;
pub use runner::{Optimizer, OptimizerDeps};
pub use score::{rank, Candidate, ScoreWeights};
