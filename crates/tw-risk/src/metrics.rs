//! Scalar portfolio risk view used by the dashboard.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::rules::PortfolioSnapshot;

/// Flat risk summary for one account. When the account fetch fails the view
/// is zero-filled with `error` set; it never raises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioRiskView {
    pub account_value: Decimal,
    pub buying_power: Decimal,
    pub total_position_value: Decimal,
    pub cash: Decimal,
    pub number_of_positions: usize,
    pub daily_pl: Decimal,
    pub daily_pl_percent: Decimal,
    pub total_unrealized_pl: Decimal,
    pub total_unrealized_pl_percent: Decimal,
    pub leverage: Decimal,
    pub max_drawdown_percent: Decimal,
    pub error: Option<String>,
}

impl PortfolioRiskView {
    /// Compute the view from a portfolio snapshot.
    pub fn from_snapshot(snapshot: &PortfolioSnapshot) -> Self {
        let total_position_value = snapshot.gross_exposure();
        let total_unrealized_pl: Decimal =
            snapshot.positions.iter().map(|p| p.unrealized_pl).sum();

        let start_of_day = snapshot.account_value - snapshot.daily_pl;
        let daily_pl_percent = pct(snapshot.daily_pl, start_of_day);

        let cost_basis = total_position_value - total_unrealized_pl;
        let total_unrealized_pl_percent = pct(total_unrealized_pl, cost_basis);

        let leverage = if snapshot.account_value > Decimal::ZERO {
            total_position_value / snapshot.account_value
        } else {
            Decimal::ZERO
        };

        let max_drawdown_percent = if snapshot.peak_equity > Decimal::ZERO {
            (snapshot.peak_equity - snapshot.account_value) / snapshot.peak_equity
                * Decimal::from(100)
        } else {
            Decimal::ZERO
        };

        Self {
            account_value: snapshot.account_value,
            buying_power: snapshot.buying_power,
            total_position_value,
            cash: snapshot.cash,
            number_of_positions: snapshot.open_position_count(),
            daily_pl: snapshot.daily_pl,
            daily_pl_percent,
            total_unrealized_pl,
            total_unrealized_pl_percent,
            leverage,
            max_drawdown_percent,
            error: None,
        }
    }

    /// Zero-filled view carrying the fetch failure.
    pub fn unavailable(error: &str) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

fn pct(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator > Decimal::ZERO {
        numerator / denominator * Decimal::from(100)
    } else {
        Decimal::ZERO
    }
}
