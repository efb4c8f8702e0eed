//! Deterministic signal generation over indicator snapshots.
//!
//! `generate` is pure: the same snapshot and position flag always produce
//! the same decision. Crossings are detected from the explicit
//! current/previous pairs in the snapshot, never from hidden state.

use serde::{Deserialize, Serialize};

use tw_types::{Parameters, SignalType, StrategyType};

use crate::snapshot::IndicatorSnapshot;

/// Floor applied to every non-HOLD signal so downstream risk sizing has a
/// lower bound to work with.
pub const MIN_ACTIONABLE_STRENGTH: f64 = 0.3;

/// Outcome of one strategy evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalDecision {
    pub signal: SignalType,
    pub strength: f64,
    pub reasoning: String,
}

impl SignalDecision {
    fn hold(reasoning: impl Into<String>) -> Self {
        Self {
            signal: SignalType::Hold,
            strength: 0.0,
            reasoning: reasoning.into(),
        }
    }

    fn actionable(signal: SignalType, raw_strength: f64, reasoning: String) -> Self {
        Self {
            signal,
            strength: raw_strength.clamp(MIN_ACTIONABLE_STRENGTH, 1.0),
            reasoning,
        }
    }

    fn buy(raw_strength: f64, reasoning: String) -> Self {
        Self::actionable(SignalType::Buy, raw_strength, reasoning)
    }

    fn sell(raw_strength: f64, reasoning: String) -> Self {
        Self::actionable(SignalType::Sell, raw_strength, reasoning)
    }
}

macro_rules! require {
    ($snap:expr, pair $name:literal) => {
        match $snap.pair($name) {
            Some(pair) => pair,
            None => return SignalDecision::hold(concat!("indicator unavailable: ", $name)),
        }
    };
    ($snap:expr, value $name:literal) => {
        match $snap.get($name) {
            Some(value) => value,
            None => return SignalDecision::hold(concat!("indicator unavailable: ", $name)),
        }
    };
}

/// Evaluate one strategy type against an indicator snapshot.
pub fn generate(
    strategy_type: StrategyType,
    params: &Parameters,
    snapshot: &IndicatorSnapshot,
    has_position: bool,
) -> SignalDecision {
    match strategy_type {
        StrategyType::SmaCrossover => sma_crossover(snapshot),
        StrategyType::Rsi => rsi(params, snapshot, has_position),
        StrategyType::Macd => macd(snapshot),
        StrategyType::BollingerBands => bollinger(snapshot),
        StrategyType::MeanReversion | StrategyType::PairsTrading => mean_reversion(snapshot),
        StrategyType::Vwap => vwap(snapshot),
        StrategyType::Momentum => momentum(params, snapshot),
        StrategyType::Breakout => breakout(snapshot),
        StrategyType::Stochastic => stochastic(params, snapshot),
        StrategyType::KeltnerChannel => keltner(params, snapshot),
        StrategyType::AtrTrailingStop => atr_trailing_stop(snapshot),
        StrategyType::DonchianChannel => donchian(snapshot),
        StrategyType::IchimokuCloud => ichimoku(snapshot),
    }
}

fn sma_crossover(snap: &IndicatorSnapshot) -> SignalDecision {
    let (short_prev, short) = require!(snap, pair "short_ma");
    let (long_prev, long) = require!(snap, pair "long_ma");
    if long == 0.0 {
        return SignalDecision::hold("long MA is zero");
    }

    let raw = ((short - long).abs() / long * 20.0).min(1.0);
    if short_prev <= long_prev && short > long {
        SignalDecision::buy(
            raw,
            format!("short MA {short:.2} crossed above long MA {long:.2}"),
        )
    } else if short_prev >= long_prev && short < long {
        SignalDecision::sell(
            raw,
            format!("short MA {short:.2} crossed below long MA {long:.2}"),
        )
    } else {
        SignalDecision::hold("no MA crossing")
    }
}

fn rsi(params: &Parameters, snap: &IndicatorSnapshot, has_position: bool) -> SignalDecision {
    let (_, rsi) = require!(snap, pair "rsi");
    let oversold = params.f64_or("oversold", 30.0);
    let overbought = params.f64_or("overbought", 70.0);

    if rsi < oversold && !has_position {
        let raw = (oversold - rsi) / oversold;
        SignalDecision::buy(raw, format!("RSI {rsi:.1} below oversold {oversold:.0}"))
    } else if rsi > overbought && has_position {
        let raw = (rsi - overbought) / overbought;
        SignalDecision::sell(
            raw,
            format!("RSI {rsi:.1} above overbought {overbought:.0}"),
        )
    } else {
        SignalDecision::hold(format!("RSI {rsi:.1} in neutral zone"))
    }
}

fn macd(snap: &IndicatorSnapshot) -> SignalDecision {
    let (macd_prev, macd) = require!(snap, pair "macd");
    let (signal_prev, signal) = require!(snap, pair "macd_signal");

    let raw = ((macd - signal).abs() / signal.abs().max(1e-9)).min(1.0);
    if macd_prev <= signal_prev && macd > signal {
        SignalDecision::buy(
            raw,
            format!("MACD {macd:.4} crossed above signal {signal:.4}"),
        )
    } else if macd_prev >= signal_prev && macd < signal {
        SignalDecision::sell(
            raw,
            format!("MACD {macd:.4} crossed below signal {signal:.4}"),
        )
    } else {
        SignalDecision::hold("no MACD crossing")
    }
}

fn bollinger(snap: &IndicatorSnapshot) -> SignalDecision {
    let close = require!(snap, value "close");
    let upper = require!(snap, value "upper");
    let lower = require!(snap, value "lower");
    let sigma = require!(snap, value "sigma");
    if sigma <= 0.0 {
        return SignalDecision::hold("flat band");
    }

    if close <= lower {
        let raw = 0.3 + (lower - close) / sigma;
        SignalDecision::buy(
            raw,
            format!("close {close:.2} at or below lower band {lower:.2}"),
        )
    } else if close >= upper {
        let raw = 0.3 + (close - upper) / sigma;
        SignalDecision::sell(
            raw,
            format!("close {close:.2} at or above upper band {upper:.2}"),
        )
    } else {
        SignalDecision::hold("close inside bands")
    }
}

fn mean_reversion(snap: &IndicatorSnapshot) -> SignalDecision {
    let z = require!(snap, value "zscore");
    let raw = z.abs() / 4.0;
    if z < -2.0 {
        SignalDecision::buy(raw, format!("z-score {z:.2} below -2"))
    } else if z > 2.0 {
        SignalDecision::sell(raw, format!("z-score {z:.2} above +2"))
    } else {
        SignalDecision::hold(format!("z-score {z:.2} within ±2"))
    }
}

fn vwap(snap: &IndicatorSnapshot) -> SignalDecision {
    let (close_prev, close) = require!(snap, pair "close");
    let (vwap_prev, vwap) = require!(snap, pair "vwap");
    if vwap == 0.0 {
        return SignalDecision::hold("VWAP undefined");
    }

    let raw = ((close - vwap).abs() / vwap * 100.0).min(1.0);
    if close_prev <= vwap_prev && close > vwap {
        SignalDecision::buy(
            raw,
            format!("close {close:.2} crossed above VWAP {vwap:.2}"),
        )
    } else if close_prev >= vwap_prev && close < vwap {
        SignalDecision::sell(
            raw,
            format!("close {close:.2} crossed below VWAP {vwap:.2}"),
        )
    } else {
        SignalDecision::hold("no VWAP crossing")
    }
}

fn momentum(params: &Parameters, snap: &IndicatorSnapshot) -> SignalDecision {
    let ret = require!(snap, value "return");
    let threshold = params.f64_or("threshold", 0.05);
    if threshold <= 0.0 {
        return SignalDecision::hold("momentum threshold not positive");
    }

    let raw = ret.abs() / threshold * 0.5;
    if ret > threshold {
        SignalDecision::buy(
            raw,
            format!("return {:.2}% above +{:.2}%", ret * 100.0, threshold * 100.0),
        )
    } else if ret < -threshold {
        SignalDecision::sell(
            raw,
            format!(
                "return {:.2}% below -{:.2}%",
                ret * 100.0,
                threshold * 100.0
            ),
        )
    } else {
        SignalDecision::hold("momentum inside threshold")
    }
}

fn breakout(snap: &IndicatorSnapshot) -> SignalDecision {
    let close = require!(snap, value "close");
    let prior_high = require!(snap, value "prior_high");
    let prior_low = require!(snap, value "prior_low");

    if close > prior_high && prior_high > 0.0 {
        let raw = 0.3 + (close - prior_high) / prior_high * 20.0;
        SignalDecision::buy(
            raw,
            format!("close {close:.2} broke above {prior_high:.2}"),
        )
    } else if close < prior_low && prior_low > 0.0 {
        let raw = 0.3 + (prior_low - close) / prior_low * 20.0;
        SignalDecision::sell(raw, format!("close {close:.2} broke below {prior_low:.2}"))
    } else {
        SignalDecision::hold("no range breakout")
    }
}

fn stochastic(params: &Parameters, snap: &IndicatorSnapshot) -> SignalDecision {
    let (k_prev, k) = require!(snap, pair "stoch_k");
    let (d_prev, d) = require!(snap, pair "stoch_d");
    let oversold = params.f64_or("oversold", 20.0);
    let overbought = params.f64_or("overbought", 80.0);

    if k_prev <= d_prev && k > d && k < oversold {
        let raw = 0.3 + (oversold - k) / oversold;
        SignalDecision::buy(
            raw,
            format!("%K {k:.1} crossed above %D {d:.1} in oversold zone"),
        )
    } else if k_prev >= d_prev && k < d && k > overbought {
        let raw = 0.3 + (k - overbought) / (100.0 - overbought);
        SignalDecision::sell(
            raw,
            format!("%K {k:.1} crossed below %D {d:.1} in overbought zone"),
        )
    } else {
        SignalDecision::hold("no qualified stochastic crossing")
    }
}

fn keltner(params: &Parameters, snap: &IndicatorSnapshot) -> SignalDecision {
    let close = require!(snap, value "close");
    let upper = require!(snap, value "upper");
    let lower = require!(snap, value "lower");
    let middle = require!(snap, value "middle");
    let half_width = (upper - middle).max(1e-9);

    let mean_reversion = params.get_str("mode") == Some("mean_reversion");
    if close > upper {
        let raw = 0.3 + (close - upper) / half_width;
        if mean_reversion {
            SignalDecision::sell(
                raw,
                format!("close {close:.2} above upper Keltner band {upper:.2}"),
            )
        } else {
            SignalDecision::buy(
                raw,
                format!("close {close:.2} broke above Keltner band {upper:.2}"),
            )
        }
    } else if close < lower {
        let raw = 0.3 + (lower - close) / half_width;
        if mean_reversion {
            SignalDecision::buy(
                raw,
                format!("close {close:.2} below lower Keltner band {lower:.2}"),
            )
        } else {
            SignalDecision::sell(
                raw,
                format!("close {close:.2} broke below Keltner band {lower:.2}"),
            )
        }
    } else {
        SignalDecision::hold("close inside Keltner channel")
    }
}

fn atr_trailing_stop(snap: &IndicatorSnapshot) -> SignalDecision {
    let (close_prev, close) = require!(snap, pair "close");
    let (ema_prev, ema) = require!(snap, pair "trend_ema");
    let (stop_prev, stop) = require!(snap, pair "stop");

    if close_prev <= ema_prev && close > ema && ema > 0.0 {
        let raw = 0.3 + (close - ema) / ema * 20.0;
        SignalDecision::buy(
            raw,
            format!("close {close:.2} crossed above trend EMA {ema:.2}"),
        )
    } else if close_prev >= stop_prev && close < stop && stop > 0.0 {
        let raw = 0.3 + (stop - close) / stop * 20.0;
        SignalDecision::sell(
            raw,
            format!("close {close:.2} fell through trailing stop {stop:.2}"),
        )
    } else {
        SignalDecision::hold("trend intact")
    }
}

fn donchian(snap: &IndicatorSnapshot) -> SignalDecision {
    let close = require!(snap, value "close");
    let entry_high = require!(snap, value "entry_high");
    let exit_low = require!(snap, value "exit_low");

    if close > entry_high && entry_high > 0.0 {
        let raw = 0.3 + (close - entry_high) / entry_high * 20.0;
        SignalDecision::buy(
            raw,
            format!("close {close:.2} above prior {entry_high:.2} channel high"),
        )
    } else if close < exit_low && exit_low > 0.0 {
        let raw = 0.3 + (exit_low - close) / exit_low * 20.0;
        SignalDecision::sell(
            raw,
            format!("close {close:.2} below prior {exit_low:.2} channel low"),
        )
    } else {
        SignalDecision::hold("close inside Donchian channel")
    }
}

fn ichimoku(snap: &IndicatorSnapshot) -> SignalDecision {
    let close = require!(snap, value "close");
    let (tenkan_prev, tenkan) = require!(snap, pair "tenkan");
    let (kijun_prev, kijun) = require!(snap, pair "kijun");
    let cloud_top = require!(snap, value "cloud_top");
    let cloud_bottom = require!(snap, value "cloud_bottom");
    let future_a = require!(snap, value "future_span_a");
    let future_b = require!(snap, value "future_span_b");

    let crossed_up = tenkan_prev <= kijun_prev && tenkan > kijun;
    let crossed_down = tenkan_prev >= kijun_prev && tenkan < kijun;

    if crossed_up {
        if close > cloud_top && future_a > future_b {
            SignalDecision::buy(
                0.9,
                format!("Tenkan/Kijun bullish cross above a green cloud (close {close:.2})"),
            )
        } else {
            SignalDecision::buy(0.5, "Tenkan crossed above Kijun".into())
        }
    } else if crossed_down {
        if close < cloud_bottom && future_a < future_b {
            SignalDecision::sell(
                0.9,
                format!("Tenkan/Kijun bearish cross below a red cloud (close {close:.2})"),
            )
        } else {
            SignalDecision::sell(0.5, "Tenkan crossed below Kijun".into())
        }
    } else {
        SignalDecision::hold("no Tenkan/Kijun crossing")
    }
}
