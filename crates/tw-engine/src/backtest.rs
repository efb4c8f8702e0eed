//! Chronological backtest driver.
//!
//! Walks the series bar by bar, rebuilding the indicator snapshot over the
//! window ending at each bar and simulating fills at that bar's close, so
//! the strategy never sees data it wouldn't have had live.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tw_ta::{build_snapshot, generate, required_history};
use tw_types::{
    Bar, BacktestMetrics, IndicatorError, Parameters, SignalType, StrategyType, TwResult,
};

use crate::metrics::compute_metrics;

/// Configuration for one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
    pub strategy_type: StrategyType,
    pub parameters: Parameters,
    pub initial_capital: Decimal,
    /// Fraction of equity deployed on each entry.
    pub position_size_pct: Decimal,
}

impl BacktestConfig {
    pub fn new(strategy_type: StrategyType, parameters: Parameters) -> Self {
        Self {
            strategy_type,
            parameters,
            initial_capital: Decimal::from(100_000),
            position_size_pct: Decimal::new(95, 2),
        }
    }
}

/// Equity at one bar close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// One completed entry/exit pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundTrip {
    pub entered_at: DateTime<Utc>,
    pub exited_at: DateTime<Utc>,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
}

/// Full result of one backtest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub equity_curve: Vec<EquityPoint>,
    pub round_trips: Vec<RoundTrip>,
    pub final_equity: Decimal,
    pub signals_generated: u64,
}

struct OpenPosition {
    quantity: Decimal,
    entry_price: Decimal,
    entered_at: DateTime<Utc>,
}

/// Run a single-symbol backtest over an ascending bar series.
pub fn run_backtest(config: &BacktestConfig, bars: &[Bar]) -> TwResult<BacktestReport> {
    let warmup = required_history(config.strategy_type, &config.parameters);
    if bars.len() <= warmup {
        return Err(IndicatorError::InsufficientData {
            required: warmup + 1,
            got: bars.len(),
        }
        .into());
    }

    let mut cash = config.initial_capital;
    let mut position: Option<OpenPosition> = None;
    let mut equity_curve = Vec::with_capacity(bars.len() - warmup);
    let mut round_trips = Vec::new();
    let mut signals_generated = 0u64;

    for i in warmup..bars.len() {
        let window = &bars[..=i];
        let bar = &bars[i];
        let close = bar.close;

        let decision = match build_snapshot(config.strategy_type, &config.parameters, window) {
            Ok(snapshot) => generate(
                config.strategy_type,
                &config.parameters,
                &snapshot,
                position.is_some(),
            ),
            // A degenerate window mid-series skips this bar.
            Err(e) => {
                debug!(bar = i, error = %e, "snapshot unavailable, skipping bar");
                record_equity(&mut equity_curve, bar.timestamp, cash, &position, close);
                continue;
            }
        };

        if decision.signal != SignalType::Hold {
            signals_generated += 1;
        }

        match decision.signal {
            SignalType::Buy if position.is_none() => {
                let budget = (cash * config.position_size_pct).max(Decimal::ZERO);
                let quantity = if close > Decimal::ZERO {
                    (budget / close).floor()
                } else {
                    Decimal::ZERO
                };
                if quantity >= Decimal::ONE {
                    cash -= quantity * close;
                    position = Some(OpenPosition {
                        quantity,
                        entry_price: close,
                        entered_at: bar.timestamp,
                    });
                }
            }
            SignalType::Sell => {
                if let Some(open) = position.take() {
                    cash += open.quantity * close;
                    round_trips.push(RoundTrip {
                        entered_at: open.entered_at,
                        exited_at: bar.timestamp,
                        quantity: open.quantity,
                        entry_price: open.entry_price,
                        exit_price: close,
                        pnl: (close - open.entry_price) * open.quantity,
                    });
                }
            }
            _ => {}
        }

        record_equity(&mut equity_curve, bar.timestamp, cash, &position, close);
    }

    let final_equity = equity_curve
        .last()
        .map(|p| p.equity)
        .unwrap_or(config.initial_capital);

    let metrics = compute_metrics(
        config.initial_capital.to_f64().unwrap_or(0.0),
        &equity_curve
            .iter()
            .map(|p| p.equity.to_f64().unwrap_or(0.0))
            .collect::<Vec<_>>(),
        &round_trips
            .iter()
            .map(|t| t.pnl.to_f64().unwrap_or(0.0))
            .collect::<Vec<_>>(),
    );

    Ok(BacktestReport {
        metrics,
        equity_curve,
        round_trips,
        final_equity,
        signals_generated,
    })
}

fn record_equity(
    curve: &mut Vec<EquityPoint>,
    timestamp: DateTime<Utc>,
    cash: Decimal,
    position: &Option<OpenPosition>,
    close: Decimal,
) {
    let market_value = position
        .as_ref()
        .map(|p| p.quantity * close)
        .unwrap_or(Decimal::ZERO);
    curve.push(EquityPoint {
        timestamp,
        equity: cash + market_value,
    });
}
