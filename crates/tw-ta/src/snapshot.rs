//! Indicator snapshots: the bridge between raw bar history and the
//! deterministic signal generator.
//!
//! [`build_snapshot`] computes exactly the indicator bundle a strategy type
//! needs over the trailing window and exposes named current/previous values;
//! [`generate`](crate::generate) then reads only the snapshot. This keeps the
//! generator pure and shared between live checks and backtests.

use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tw_types::{Bar, IndicatorError, Parameters, StrategyType};

use crate::indicators;

/// Extra bars requested beyond the strict warm-up, so one missing session
/// doesn't starve the pipeline.
pub const HISTORY_SLACK: usize = 10;

/// Named indicator values for one evaluation instant. `name` holds the
/// current value and `name_prev` the value one bar earlier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    values: BTreeMap<String, f64>,
}

impl IndicatorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: &str, value: f64) {
        self.values.insert(name.to_string(), value);
    }

    pub fn insert_pair(&mut self, name: &str, prev: f64, current: f64) {
        self.values.insert(format!("{name}_prev"), prev);
        self.values.insert(name.to_string(), current);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied().filter(|v| !v.is_nan())
    }

    /// (previous, current) pair, present only when both are defined.
    pub fn pair(&self, name: &str) -> Option<(f64, f64)> {
        Some((self.get(&format!("{name}_prev"))?, self.get(name)?))
    }

    /// The snapshot as persisted on a signal record.
    pub fn to_map(&self) -> BTreeMap<String, f64> {
        self.values
            .iter()
            .filter(|(_, v)| !v.is_nan())
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

/// Donchian windows: default (20, 10), Turtle system-2 (55, 20).
fn donchian_windows(params: &Parameters) -> (usize, usize) {
    if params.bool_or("use_system_2", false) {
        (55, 20)
    } else {
        (
            params.usize_or("entry_period", 20),
            params.usize_or("exit_period", 10),
        )
    }
}

/// Warm-up bar count (plus slack) a strategy type needs before it can emit
/// defined values.
pub fn required_history(strategy_type: StrategyType, params: &Parameters) -> usize {
    let warmup = match strategy_type {
        StrategyType::SmaCrossover => params.usize_or("long_period", 20) + 1,
        StrategyType::Rsi => params.usize_or("period", 14) + 1,
        StrategyType::Macd => {
            params.usize_or("slow_period", 26) + params.usize_or("signal_period", 9)
        }
        StrategyType::BollingerBands => params.usize_or("period", 20) + 1,
        StrategyType::MeanReversion | StrategyType::PairsTrading => {
            params.usize_or("period", 20) + 1
        }
        StrategyType::Vwap => 2,
        StrategyType::Momentum => params.usize_or("period", 10) + 1,
        StrategyType::Breakout => params.usize_or("period", 20) + 2,
        StrategyType::Stochastic => {
            params.usize_or("k_period", 14)
                + params.usize_or("smooth", 3)
                + params.usize_or("d_period", 3)
        }
        StrategyType::KeltnerChannel => {
            let ema = params.usize_or("ema_period", 20);
            let atr = params.usize_or("atr_period", 10);
            ema.max(atr + 1) + 1
        }
        StrategyType::AtrTrailingStop => {
            let trend = params.usize_or("trend_period", 50);
            let atr = params.usize_or("atr_period", 14);
            trend.max(atr + 1) + 1
        }
        StrategyType::DonchianChannel => {
            let (entry, exit) = donchian_windows(params);
            entry.max(exit) + 2
        }
        StrategyType::IchimokuCloud => 52 + 26 + 1,
    };
    warmup + HISTORY_SLACK
}

fn to_f64(value: rust_decimal::Decimal) -> f64 {
    value.to_f64().unwrap_or_default()
}

fn last_pair(series: &[f64]) -> (f64, f64) {
    let n = series.len();
    (series[n - 2], series[n - 1])
}

/// Compute the indicator snapshot for one strategy type over the trailing
/// bar window. Errors if the history is shorter than the warm-up.
pub fn build_snapshot(
    strategy_type: StrategyType,
    params: &Parameters,
    bars: &[Bar],
) -> Result<IndicatorSnapshot, IndicatorError> {
    let closes: Vec<f64> = bars.iter().map(|b| to_f64(b.close)).collect();
    let highs: Vec<f64> = bars.iter().map(|b| to_f64(b.high)).collect();
    let lows: Vec<f64> = bars.iter().map(|b| to_f64(b.low)).collect();
    let volumes: Vec<f64> = bars.iter().map(|b| to_f64(b.volume)).collect();

    if closes.len() < 2 {
        return Err(IndicatorError::InsufficientData {
            required: 2,
            got: closes.len(),
        });
    }

    let mut snap = IndicatorSnapshot::new();
    let (close_prev, close) = last_pair(&closes);
    snap.insert_pair("close", close_prev, close);

    match strategy_type {
        StrategyType::SmaCrossover => {
            let short = params.usize_or("short_period", 10);
            let long = params.usize_or("long_period", 20);
            if short >= long {
                return Err(IndicatorError::BadParameter {
                    name: "short_period".into(),
                    message: format!("short period {short} must be below long period {long}"),
                });
            }
            let short_ma = indicators::sma(&closes, short)?;
            let long_ma = indicators::sma(&closes, long)?;
            if closes.len() < long + 1 {
                return Err(IndicatorError::InsufficientData {
                    required: long + 1,
                    got: closes.len(),
                });
            }
            let (sp, sc) = last_pair(&short_ma);
            let (lp, lc) = last_pair(&long_ma);
            snap.insert_pair("short_ma", sp, sc);
            snap.insert_pair("long_ma", lp, lc);
        }
        StrategyType::Rsi => {
            let period = params.usize_or("period", 14);
            let series = indicators::rsi(&closes, period)?;
            if closes.len() < period + 2 {
                return Err(IndicatorError::InsufficientData {
                    required: period + 2,
                    got: closes.len(),
                });
            }
            let (prev, cur) = last_pair(&series);
            snap.insert_pair("rsi", prev, cur);
        }
        StrategyType::Macd => {
            let fast = params.usize_or("fast_period", 12);
            let slow = params.usize_or("slow_period", 26);
            let signal = params.usize_or("signal_period", 9);
            let result = indicators::macd(&closes, fast, slow, signal)?;
            let (mp, mc) = last_pair(&result.macd);
            let (sp, sc) = last_pair(&result.signal);
            let (_, hist) = last_pair(&result.histogram);
            snap.insert_pair("macd", mp, mc);
            snap.insert_pair("macd_signal", sp, sc);
            snap.insert("histogram", hist);
        }
        StrategyType::BollingerBands => {
            let period = params.usize_or("period", 20);
            let k = params.f64_or("std_dev", 2.0);
            let bands = indicators::bollinger(&closes, period, k)?;
            let sigma = indicators::stddev(&closes, period)?;
            snap.insert("middle", *bands.middle.last().unwrap());
            snap.insert("upper", *bands.upper.last().unwrap());
            snap.insert("lower", *bands.lower.last().unwrap());
            snap.insert("sigma", *sigma.last().unwrap());
        }
        StrategyType::MeanReversion | StrategyType::PairsTrading => {
            let period = params.usize_or("period", 20);
            let mean = indicators::sma(&closes, period)?;
            let sigma = indicators::stddev(&closes, period)?;
            let (mean_cur, sigma_cur) = (*mean.last().unwrap(), *sigma.last().unwrap());
            let z = if sigma_cur > 0.0 {
                (close - mean_cur) / sigma_cur
            } else {
                0.0
            };
            snap.insert("mean", mean_cur);
            snap.insert("sigma", sigma_cur);
            snap.insert("zscore", z);
        }
        StrategyType::Vwap => {
            let series = indicators::vwap(&highs, &lows, &closes, &volumes)?;
            let (prev, cur) = last_pair(&series);
            snap.insert_pair("vwap", prev, cur);
        }
        StrategyType::Momentum => {
            let period = params.usize_or("period", 10);
            let series = indicators::roc(&closes, period)?;
            snap.insert("return", *series.last().unwrap());
        }
        StrategyType::Breakout => {
            let period = params.usize_or("period", 20);
            if closes.len() < period + 2 {
                return Err(IndicatorError::InsufficientData {
                    required: period + 2,
                    got: closes.len(),
                });
            }
            // Rolling extremes over the window excluding the current bar.
            let n = highs.len();
            let prior_high = indicators::rolling_max(&highs[..n - 1], period)?;
            let prior_low = indicators::rolling_min(&lows[..n - 1], period)?;
            snap.insert("prior_high", *prior_high.last().unwrap());
            snap.insert("prior_low", *prior_low.last().unwrap());
        }
        StrategyType::Stochastic => {
            let k_period = params.usize_or("k_period", 14);
            let d_period = params.usize_or("d_period", 3);
            let smooth = params.usize_or("smooth", 3);
            let osc =
                indicators::stochastic(&highs, &lows, &closes, k_period, d_period, smooth)?;
            if closes.len() < k_period + smooth + d_period + 1 {
                return Err(IndicatorError::InsufficientData {
                    required: k_period + smooth + d_period + 1,
                    got: closes.len(),
                });
            }
            let (kp, kc) = last_pair(&osc.k);
            let (dp, dc) = last_pair(&osc.d);
            snap.insert_pair("stoch_k", kp, kc);
            snap.insert_pair("stoch_d", dp, dc);
        }
        StrategyType::KeltnerChannel => {
            let ema_period = params.usize_or("ema_period", 20);
            let atr_period = params.usize_or("atr_period", 10);
            let multiplier = params.f64_or("multiplier", 2.0);
            let channel = indicators::keltner(
                &highs,
                &lows,
                &closes,
                ema_period,
                atr_period,
                multiplier,
            )?;
            snap.insert("middle", *channel.middle.last().unwrap());
            snap.insert("upper", *channel.upper.last().unwrap());
            snap.insert("lower", *channel.lower.last().unwrap());
        }
        StrategyType::AtrTrailingStop => {
            let trend_period = params.usize_or("trend_period", 50);
            let atr_period = params.usize_or("atr_period", 14);
            let multiplier = params.f64_or("multiplier", 3.0);
            let required = trend_period.max(atr_period + 1) + 1;
            if closes.len() < required {
                return Err(IndicatorError::InsufficientData {
                    required,
                    got: closes.len(),
                });
            }
            let trend = indicators::ema(&closes, trend_period)?;
            let atr_series = indicators::atr(&highs, &lows, &closes, atr_period)?;
            let highest = indicators::rolling_max(&highs, atr_period)?;

            let (tp, tc) = last_pair(&trend);
            snap.insert_pair("trend_ema", tp, tc);

            // Chandelier stop: highest high minus a multiple of ATR.
            let n = closes.len();
            let stop_cur = highest[n - 1] - multiplier * atr_series[n - 1];
            let stop_prev = highest[n - 2] - multiplier * atr_series[n - 2];
            snap.insert_pair("stop", stop_prev, stop_cur);
        }
        StrategyType::DonchianChannel => {
            let (entry, exit) = donchian_windows(params);
            let channel = indicators::donchian(&highs, &lows, entry, exit)?;
            let n = highs.len();
            if n < entry.max(exit) + 2 {
                return Err(IndicatorError::InsufficientData {
                    required: entry.max(exit) + 2,
                    got: n,
                });
            }
            // Prior-period extremes: the channel values one bar back.
            snap.insert("entry_high", channel.upper[n - 2]);
            snap.insert("exit_low", channel.lower[n - 2]);
        }
        StrategyType::IchimokuCloud => {
            let cloud = indicators::ichimoku(&highs, &lows, &closes, 9, 26, 52, 26)?;
            let n = closes.len();
            let (tp, tc) = last_pair(&cloud.tenkan);
            let (kp, kc) = last_pair(&cloud.kijun);
            snap.insert_pair("tenkan", tp, tc);
            snap.insert_pair("kijun", kp, kc);
            snap.insert("cloud_top", cloud.senkou_a[n - 1].max(cloud.senkou_b[n - 1]));
            snap.insert(
                "cloud_bottom",
                cloud.senkou_a[n - 1].min(cloud.senkou_b[n - 1]),
            );
            // The cloud that will be in effect `displacement` bars ahead.
            let future_a = (tc + kc) / 2.0;
            let future_b = indicators::midpoint(&highs, &lows, 52)?[n - 1];
            snap.insert("future_span_a", future_a);
            snap.insert("future_span_b", future_b);
        }
    }

    Ok(snap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;

    fn bars_from_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| {
                Bar::new(
                    start + Duration::days(i as i64),
                    Decimal::from_f64_retain(c).unwrap(),
                    Decimal::from_f64_retain(c * 1.01).unwrap(),
                    Decimal::from_f64_retain(c * 0.99).unwrap(),
                    Decimal::from_f64_retain(c).unwrap(),
                    Decimal::from(1000),
                )
            })
            .collect()
    }

    fn trending_closes(n: usize) -> Vec<f64> {
        (0..n).map(|i| 100.0 + i as f64 * 0.5).collect()
    }

    #[test]
    fn test_snapshot_pair_access() {
        let mut snap = IndicatorSnapshot::new();
        snap.insert_pair("rsi", 35.0, 28.0);
        assert_eq!(snap.pair("rsi"), Some((35.0, 28.0)));
        assert_eq!(snap.get("rsi"), Some(28.0));
        assert!(snap.pair("macd").is_none());
    }

    #[test]
    fn test_nan_values_are_hidden() {
        let mut snap = IndicatorSnapshot::new();
        snap.insert("broken", f64::NAN);
        assert!(snap.get("broken").is_none());
        assert!(!snap.to_map().contains_key("broken"));
    }

    #[test]
    fn test_sma_crossover_snapshot() {
        let bars = bars_from_closes(&trending_closes(40));
        let params = Parameters::new()
            .with("short_period", 5)
            .with("long_period", 20);
        let snap = build_snapshot(StrategyType::SmaCrossover, &params, &bars).unwrap();
        // In a steady uptrend the short MA sits above the long MA.
        let (_, short) = snap.pair("short_ma").unwrap();
        let (_, long) = snap.pair("long_ma").unwrap();
        assert!(short > long);
    }

    #[test]
    fn test_rsi_snapshot_on_downtrend() {
        let closes: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let bars = bars_from_closes(&closes);
        let params = Parameters::new().with("period", 14);
        let snap = build_snapshot(StrategyType::Rsi, &params, &bars).unwrap();
        let (_, rsi) = snap.pair("rsi").unwrap();
        assert!(rsi < 10.0, "steady decline should pin RSI low, got {rsi}");
    }

    #[test]
    fn test_insufficient_history_is_error_not_nan() {
        let bars = bars_from_closes(&trending_closes(10));
        let params = Parameters::new().with("period", 14);
        let err = build_snapshot(StrategyType::Rsi, &params, &bars).unwrap_err();
        assert!(matches!(err, IndicatorError::InsufficientData { .. }));
    }

    #[test]
    fn test_every_type_builds_with_enough_history() {
        let bars = bars_from_closes(
            &(0..120)
                .map(|i| 100.0 + (i as f64 * 0.3).sin() * 8.0)
                .collect::<Vec<_>>(),
        );
        for strategy_type in StrategyType::ALL {
            let params = Parameters::new();
            let result = build_snapshot(strategy_type, &params, &bars);
            assert!(
                result.is_ok(),
                "{strategy_type} failed: {:?}",
                result.err()
            );
        }
    }

    #[test]
    fn test_required_history_suffices() {
        for strategy_type in StrategyType::ALL {
            let params = Parameters::new();
            let needed = required_history(strategy_type, &params);
            let bars = bars_from_closes(
                &(0..needed)
                    .map(|i| 100.0 + (i as f64 * 0.3).cos() * 5.0)
                    .collect::<Vec<_>>(),
            );
            assert!(
                build_snapshot(strategy_type, &params, &bars).is_ok(),
                "{strategy_type} cannot build with its own required_history ({needed})"
            );
        }
    }

    #[test]
    fn test_donchian_system_2_windows() {
        let params = Parameters::new().with("use_system_2", true);
        assert_eq!(donchian_windows(&params), (55, 20));
        assert_eq!(donchian_windows(&Parameters::new()), (20, 10));
    }

    #[test]
    fn test_breakout_excludes_current_bar() {
        // Current bar makes a new high; prior_high must not include it.
        let mut closes = trending_closes(30);
        closes.push(200.0);
        let bars = bars_from_closes(&closes);
        let params = Parameters::new().with("period", 20);
        let snap = build_snapshot(StrategyType::Breakout, &params, &bars).unwrap();
        let prior_high = snap.get("prior_high").unwrap();
        assert!(prior_high < 200.0);
        assert!(snap.get("close").unwrap() > prior_high);
    }
}
