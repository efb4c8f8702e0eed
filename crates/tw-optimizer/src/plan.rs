//! Deployment plans produced for optimisation winners.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tw_types::{Parameters, RankedResult};

/// Everything the quick-deploy path needs to create an ACTIVE live
/// strategy from an optimisation winner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployPlan {
    pub strategy_id: Uuid,
    pub symbol: String,
    pub name: String,
    pub parameters: Parameters,
    pub check_interval_secs: u64,
    pub auto_execute: bool,
    pub position_size_pct: Decimal,
    pub max_positions: u32,
}

impl DeployPlan {
    /// Build a plan with the quick-deploy defaults.
    pub fn from_result(result: &RankedResult) -> Self {
        Self {
            strategy_id: result.strategy_id,
            symbol: result.symbol.clone(),
            name: format!("{} on {}", result.strategy_name, result.symbol),
            parameters: result.parameters.clone(),
            check_interval_secs: 300,
            auto_execute: true,
            position_size_pct: Decimal::new(2, 2),
            max_positions: 5,
        }
    }
}
