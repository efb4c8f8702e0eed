//! Position sizing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Inputs to one sizing computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizingInputs {
    pub entry_price: Decimal,
    pub stop_loss: Option<Decimal>,
    /// Fraction of buying power allocated to the position.
    pub position_size_pct: Decimal,
    /// Absolute cash cap for the position, if configured.
    pub max_position_size: Option<Decimal>,
    /// Fraction of equity risked when a stop distance is known.
    pub risk_per_trade: Decimal,
    pub buying_power: Decimal,
    pub equity: Decimal,
}

/// Sizing outcome: whole shares, with a reason when the answer is zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSize {
    pub quantity: Decimal,
    pub reason: Option<String>,
}

impl PositionSize {
    fn zero(reason: &str) -> Self {
        Self {
            quantity: Decimal::ZERO,
            reason: Some(reason.to_string()),
        }
    }
}

/// Size a position as the tightest of three constraints: the buying-power
/// fraction, the absolute cash cap, and, when a stop is set, the
/// risk-per-trade stop-distance budget. Rounds down to whole shares.
pub fn position_size(inputs: &SizingInputs) -> PositionSize {
    if inputs.entry_price <= Decimal::ZERO {
        return PositionSize::zero("entry price not positive");
    }

    let mut size = inputs.position_size_pct * inputs.buying_power / inputs.entry_price;

    if let Some(cap) = inputs.max_position_size {
        size = size.min(cap / inputs.entry_price);
    }

    if let Some(stop) = inputs.stop_loss {
        let distance = (inputs.entry_price - stop).abs();
        if distance > Decimal::ZERO {
            size = size.min(inputs.risk_per_trade * inputs.equity / distance);
        }
    }

    let quantity = size.floor();
    if quantity < Decimal::ONE {
        return PositionSize::zero("below minimum");
    }

    PositionSize {
        quantity,
        reason: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn inputs() -> SizingInputs {
        SizingInputs {
            entry_price: dec!(49),
            stop_loss: None,
            position_size_pct: dec!(0.02),
            max_position_size: None,
            risk_per_trade: dec!(0.01),
            buying_power: dec!(100_000),
            equity: dec!(100_000),
        }
    }

    #[test]
    fn test_pct_of_buying_power() {
        // floor(100_000 · 0.02 / 49) = floor(40.8) = 40
        let size = position_size(&inputs());
        assert_eq!(size.quantity, dec!(40));
        assert!(size.reason.is_none());
    }

    #[test]
    fn test_absolute_cap_wins_when_tighter() {
        let mut i = inputs();
        i.max_position_size = Some(dec!(1_000));
        // floor(1000 / 49) = 20 < 40
        let size = position_size(&i);
        assert_eq!(size.quantity, dec!(20));
    }

    #[test]
    fn test_stop_distance_budget_wins_when_tighter() {
        let mut i = inputs();
        i.stop_loss = Some(dec!(45));
        // 0.01 * 100_000 / 4 = 250, not binding.
        assert_eq!(position_size(&i).quantity, dec!(40));

        i.stop_loss = Some(dec!(48.9));
        // 1000 / 0.1 = 10_000, still not binding; tighten equity instead.
        i.equity = dec!(1_000);
        // 0.01 * 1000 / 0.1 = 100, not binding either. Use a tight budget:
        i.risk_per_trade = dec!(0.001);
        // 0.001 · 1000 / 0.1 = 10 < 40
        assert_eq!(position_size(&i).quantity, dec!(10));
    }

    #[test]
    fn test_zero_buying_power_returns_zero() {
        let mut i = inputs();
        i.buying_power = dec!(0);
        let size = position_size(&i);
        assert_eq!(size.quantity, dec!(0));
        assert_eq!(size.reason.as_deref(), Some("below minimum"));
    }

    #[test]
    fn test_zero_pct_returns_zero() {
        let mut i = inputs();
        i.position_size_pct = dec!(0);
        let size = position_size(&i);
        assert_eq!(size.quantity, dec!(0));
        assert_eq!(size.reason.as_deref(), Some("below minimum"));
    }

    #[test]
    fn test_sub_share_result_is_below_minimum() {
        let mut i = inputs();
        i.buying_power = dec!(2_000); // 0.02 · 2000 / 49 ≈ 0.8
        let size = position_size(&i);
        assert_eq!(size.quantity, dec!(0));
        assert_eq!(size.reason.as_deref(), Some("below minimum"));
    }

    #[test]
    fn test_bad_entry_price() {
        let mut i = inputs();
        i.entry_price = dec!(0);
        let size = position_size(&i);
        assert_eq!(size.quantity, dec!(0));
        assert_eq!(size.reason.as_deref(), Some("entry price not positive"));
    }

    #[test]
    fn test_stop_equal_to_entry_is_ignored() {
        let mut i = inputs();
        i.stop_loss = Some(dec!(49));
        // Zero distance would divide by zero; the constraint is skipped.
        assert_eq!(position_size(&i).quantity, dec!(40));
    }
}
