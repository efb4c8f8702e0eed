//! Backtest performance metrics.

use tw_types::BacktestMetrics;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Compute summary metrics from an equity curve and closed round-trip P&Ls.
///
/// Sharpe is annualised over 252 trading days with a zero risk-free rate;
/// profit factor is `None` when there are no losing trades.
pub fn compute_metrics(
    initial_capital: f64,
    equity_curve: &[f64],
    round_trip_pnls: &[f64],
) -> BacktestMetrics {
    let final_equity = equity_curve.last().copied().unwrap_or(initial_capital);
    let total_return_pct = if initial_capital > 0.0 {
        (final_equity / initial_capital - 1.0) * 100.0
    } else {
        0.0
    };

    BacktestMetrics {
        total_return_pct,
        sharpe_ratio: sharpe_ratio(initial_capital, equity_curve),
        max_drawdown_pct: max_drawdown_pct(initial_capital, equity_curve),
        win_rate: win_rate(round_trip_pnls),
        total_trades: round_trip_pnls.len() as u64,
        profit_factor: profit_factor(round_trip_pnls),
    }
}

fn daily_returns(initial_capital: f64, equity_curve: &[f64]) -> Vec<f64> {
    let mut returns = Vec::with_capacity(equity_curve.len());
    let mut prev = initial_capital;
    for &equity in equity_curve {
        if prev > 0.0 {
            returns.push(equity / prev - 1.0);
        }
        prev = equity;
    }
    returns
}

fn sharpe_ratio(initial_capital: f64, equity_curve: &[f64]) -> f64 {
    let returns = daily_returns(initial_capital, equity_curve);
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance = returns
        .iter()
        .map(|r| (r - mean) * (r - mean))
        .sum::<f64>()
        / (returns.len() - 1) as f64;
    let std_dev = variance.sqrt();

    if std_dev == 0.0 {
        return 0.0;
    }
    mean / std_dev * TRADING_DAYS_PER_YEAR.sqrt()
}

fn max_drawdown_pct(initial_capital: f64, equity_curve: &[f64]) -> f64 {
    let mut peak = initial_capital;
    let mut max_dd = 0.0f64;
    for &equity in equity_curve {
        if equity > peak {
            peak = equity;
        }
        if peak > 0.0 {
            let dd = (peak - equity) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd * 100.0
}

fn win_rate(round_trip_pnls: &[f64]) -> f64 {
    if round_trip_pnls.is_empty() {
        return 0.0;
    }
    let wins = round_trip_pnls.iter().filter(|pnl| **pnl > 0.0).count();
    wins as f64 / round_trip_pnls.len() as f64
}

fn profit_factor(round_trip_pnls: &[f64]) -> Option<f64> {
    let gains: f64 = round_trip_pnls.iter().filter(|p| **p > 0.0).sum();
    let losses: f64 = round_trip_pnls.iter().filter(|p| **p < 0.0).sum();
    if losses == 0.0 {
        // No losing trades: the factor is unbounded.
        None
    } else {
        Some(gains / losses.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn test_total_return() {
        let metrics = compute_metrics(100_000.0, &[101_000.0, 103_000.0, 110_000.0], &[]);
        assert_close(metrics.total_return_pct, 10.0);
    }

    #[test]
    fn test_flat_curve_has_zero_sharpe_and_drawdown() {
        let metrics = compute_metrics(100_000.0, &[100_000.0; 20], &[]);
        assert_close(metrics.sharpe_ratio, 0.0);
        assert_close(metrics.max_drawdown_pct, 0.0);
    }

    #[test]
    fn test_max_drawdown_peak_to_trough() {
        // Peak 120, trough 90: drawdown 25%.
        let curve = [110_000.0, 120_000.0, 100_000.0, 90_000.0, 115_000.0];
        let metrics = compute_metrics(100_000.0, &curve, &[]);
        assert_close(metrics.max_drawdown_pct, 25.0);
    }

    #[test]
    fn test_win_rate_and_trades() {
        let pnls = [100.0, -50.0, 200.0, -25.0];
        let metrics = compute_metrics(100_000.0, &[100_225.0], &pnls);
        assert_close(metrics.win_rate, 0.5);
        assert_eq!(metrics.total_trades, 4);
    }

    #[test]
    fn test_profit_factor() {
        let pnls = [100.0, -50.0, 200.0, -25.0];
        let metrics = compute_metrics(100_000.0, &[100_225.0], &pnls);
        // 300 / 75 = 4
        assert_close(metrics.profit_factor.unwrap(), 4.0);
    }

    #[test]
    fn test_profit_factor_unbounded_without_losses() {
        let metrics = compute_metrics(100_000.0, &[100_300.0], &[100.0, 200.0]);
        assert!(metrics.profit_factor.is_none());
    }

    #[test]
    fn test_sharpe_positive_for_steady_gains() {
        let curve: Vec<f64> = (1..=60).map(|i| 100_000.0 * (1.0 + 0.001 * i as f64)).collect();
        let metrics = compute_metrics(100_000.0, &curve, &[]);
        assert!(metrics.sharpe_ratio > 1.0);
    }

    #[test]
    fn test_empty_round_trips_zero_win_rate() {
        let metrics = compute_metrics(100_000.0, &[100_000.0], &[]);
        assert_close(metrics.win_rate, 0.0);
        assert_eq!(metrics.total_trades, 0);
    }
}
