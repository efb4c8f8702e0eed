//! Pre-trade risk controls for Tradewind.
//!
//! Evaluation is pure: callers snapshot the portfolio from their broker and
//! pass values in, the evaluator returns a verdict plus breach bookkeeping
//! diffs. Nothing here talks to a broker or a store.

pub mod metrics;
pub mod rules;
pub mod sizing;

pub use metrics::PortfolioRiskView;
pub use rules::{
    evaluate, PortfolioSnapshot, PositionSnapshot, RiskDecision, RiskVerdict, RuleBreach,
    TradeProposal,
};
pub use sizing::{position_size, PositionSize, SizingInputs};
