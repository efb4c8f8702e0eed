//! Pure indicator functions over ordered OHLCV history.
//!
//! Every function returns a series (or bundle of series) aligned to the
//! input: `output[i]` belongs to `input[i]`, with NaN filling the warm-up
//! prefix. Callers that need defined values read the aligned tail; the
//! up-front length check guarantees at least the last two positions are
//! defined.

use tw_types::IndicatorError;

/// MACD line, its signal line, and the histogram.
#[derive(Debug, Clone, PartialEq)]
pub struct Macd {
    pub macd: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

/// Bollinger middle band with ±kσ envelopes.
#[derive(Debug, Clone, PartialEq)]
pub struct BollingerBands {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Slow %K and %D of the stochastic oscillator.
#[derive(Debug, Clone, PartialEq)]
pub struct StochasticOsc {
    pub k: Vec<f64>,
    pub d: Vec<f64>,
}

/// Keltner channel: EMA midline with ATR envelopes.
#[derive(Debug, Clone, PartialEq)]
pub struct KeltnerChannel {
    pub middle: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// Donchian channel: entry-period high and exit-period low.
#[derive(Debug, Clone, PartialEq)]
pub struct DonchianChannel {
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

/// The five Ichimoku series. Senkou spans are displaced forward so
/// `senkou_a[i]` / `senkou_b[i]` are the cloud edges in effect at bar `i`;
/// `chikou[i]` is the close displaced backward.
#[derive(Debug, Clone, PartialEq)]
pub struct IchimokuCloud {
    pub tenkan: Vec<f64>,
    pub kijun: Vec<f64>,
    pub senkou_a: Vec<f64>,
    pub senkou_b: Vec<f64>,
    pub chikou: Vec<f64>,
}

fn check_period(name: &'static str, period: usize) -> Result<(), IndicatorError> {
    if period == 0 {
        return Err(IndicatorError::BadParameter {
            name: name.into(),
            message: "period must be at least 1".into(),
        });
    }
    Ok(())
}

fn need(got: usize, required: usize) -> Result<(), IndicatorError> {
    if got < required {
        return Err(IndicatorError::InsufficientData { required, got });
    }
    Ok(())
}

fn nan_vec(len: usize) -> Vec<f64> {
    vec![f64::NAN; len]
}

/// Arithmetic mean of the last `period` values at each position.
pub fn sma(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period)?;

    let mut out = nan_vec(values.len());
    let mut window_sum: f64 = values[..period].iter().sum();
    out[period - 1] = window_sum / period as f64;
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        out[i] = window_sum / period as f64;
    }
    Ok(out)
}

/// Exponential moving average, α = 2/(n+1), seeded with SMA(n) at index n−1.
pub fn ema(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period)?;

    let mut out = nan_vec(values.len());
    let alpha = 2.0 / (period as f64 + 1.0);
    out[period - 1] = values[..period].iter().sum::<f64>() / period as f64;
    for i in period..values.len() {
        out[i] = alpha * values[i] + (1.0 - alpha) * out[i - 1];
    }
    Ok(out)
}

/// Wilder's RSI: gain/loss averages smoothed with α = 1/n, seeded with the
/// simple average of the first n differences.
pub fn rsi(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period + 1)?;

    let mut out = nan_vec(values.len());
    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = values[i] - values[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;
    out[period] = rsi_from_averages(avg_gain, avg_loss);

    for i in (period + 1)..values.len() {
        let change = values[i] - values[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
        out[i] = rsi_from_averages(avg_gain, avg_loss);
    }
    Ok(out)
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD(f, s, sig): EMA(f) − EMA(s) with an EMA(sig) signal line.
pub fn macd(
    values: &[f64],
    fast: usize,
    slow: usize,
    signal_period: usize,
) -> Result<Macd, IndicatorError> {
    check_period("fast", fast)?;
    check_period("slow", slow)?;
    check_period("signal", signal_period)?;
    if fast >= slow {
        return Err(IndicatorError::BadParameter {
            name: "fast".into(),
            message: format!("fast period {fast} must be below slow period {slow}"),
        });
    }
    need(values.len(), slow + signal_period)?;

    let len = values.len();
    let ema_fast = ema(values, fast)?;
    let ema_slow = ema(values, slow)?;

    let mut line = nan_vec(len);
    for i in (slow - 1)..len {
        line[i] = ema_fast[i] - ema_slow[i];
    }

    // Signal line is an EMA over the defined portion of the MACD line.
    let defined = &line[(slow - 1)..];
    let signal_defined = ema(defined, signal_period)?;
    let mut signal = nan_vec(len);
    for (j, v) in signal_defined.iter().enumerate() {
        signal[slow - 1 + j] = *v;
    }

    let mut histogram = nan_vec(len);
    for i in 0..len {
        if !line[i].is_nan() && !signal[i].is_nan() {
            histogram[i] = line[i] - signal[i];
        }
    }

    Ok(Macd {
        macd: line,
        signal,
        histogram,
    })
}

/// Population standard deviation over a rolling window.
pub fn stddev(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period)?;

    let mut out = nan_vec(values.len());
    for i in (period - 1)..values.len() {
        let window = &values[i + 1 - period..=i];
        let mean = window.iter().sum::<f64>() / period as f64;
        let variance =
            window.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / period as f64;
        out[i] = variance.sqrt();
    }
    Ok(out)
}

/// Bollinger(n, k): SMA middle with ±k population-σ envelopes.
pub fn bollinger(values: &[f64], period: usize, k: f64) -> Result<BollingerBands, IndicatorError> {
    let middle = sma(values, period)?;
    let sigma = stddev(values, period)?;

    let mut upper = nan_vec(values.len());
    let mut lower = nan_vec(values.len());
    for i in 0..values.len() {
        if !middle[i].is_nan() {
            upper[i] = middle[i] + k * sigma[i];
            lower[i] = middle[i] - k * sigma[i];
        }
    }
    Ok(BollingerBands {
        middle,
        upper,
        lower,
    })
}

/// True range series: max(h−l, |h−prev_close|, |l−prev_close|).
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(high.len());
    for i in 0..high.len() {
        let hl = high[i] - low[i];
        let tr = if i == 0 {
            hl
        } else {
            let prev = close[i - 1];
            hl.max((high[i] - prev).abs()).max((low[i] - prev).abs())
        };
        out.push(tr);
    }
    out
}

/// ATR(n): SMA(n) of the true range.
pub fn atr(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    period: usize,
) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(close.len(), period + 1)?;
    let tr = true_range(high, low, close);
    sma(&tr, period)
}

/// Rolling maximum over a window ending at each position.
pub fn rolling_max(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period)?;

    let mut out = nan_vec(values.len());
    for i in (period - 1)..values.len() {
        out[i] = values[i + 1 - period..=i]
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
    }
    Ok(out)
}

/// Rolling minimum over a window ending at each position.
pub fn rolling_min(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period)?;

    let mut out = nan_vec(values.len());
    for i in (period - 1)..values.len() {
        out[i] = values[i + 1 - period..=i]
            .iter()
            .copied()
            .fold(f64::MAX, f64::min);
    }
    Ok(out)
}

/// Stochastic(k, d, smooth): raw %K over `k_period`, slow %K = SMA(smooth)
/// of raw %K, %D = SMA(d) of slow %K. A flat window yields %K = 50.
pub fn stochastic(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    k_period: usize,
    d_period: usize,
    smooth: usize,
) -> Result<StochasticOsc, IndicatorError> {
    check_period("k_period", k_period)?;
    check_period("d_period", d_period)?;
    check_period("smooth", smooth)?;
    need(close.len(), k_period + smooth + d_period)?;

    let len = close.len();
    let highs = rolling_max(high, k_period)?;
    let lows = rolling_min(low, k_period)?;

    let mut raw = nan_vec(len);
    for i in (k_period - 1)..len {
        let range = highs[i] - lows[i];
        raw[i] = if range == 0.0 {
            50.0
        } else {
            100.0 * (close[i] - lows[i]) / range
        };
    }

    let raw_defined = &raw[(k_period - 1)..];
    let slow_defined = sma(raw_defined, smooth)?;
    let mut k = nan_vec(len);
    for (j, v) in slow_defined.iter().enumerate() {
        k[k_period - 1 + j] = *v;
    }

    let k_start = k_period + smooth - 2;
    let k_defined = &k[k_start..];
    let d_defined = sma(k_defined, d_period)?;
    let mut d = nan_vec(len);
    for (j, v) in d_defined.iter().enumerate() {
        d[k_start + j] = *v;
    }

    Ok(StochasticOsc { k, d })
}

/// Keltner(ema_n, atr_n, mult): EMA midline ± mult·ATR.
pub fn keltner(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    ema_period: usize,
    atr_period: usize,
    multiplier: f64,
) -> Result<KeltnerChannel, IndicatorError> {
    need(close.len(), ema_period.max(atr_period + 1))?;
    let middle = ema(close, ema_period)?;
    let atr_series = atr(high, low, close, atr_period)?;

    let len = close.len();
    let mut upper = nan_vec(len);
    let mut lower = nan_vec(len);
    for i in 0..len {
        if !middle[i].is_nan() && !atr_series[i].is_nan() {
            upper[i] = middle[i] + multiplier * atr_series[i];
            lower[i] = middle[i] - multiplier * atr_series[i];
        }
    }
    Ok(KeltnerChannel {
        middle,
        upper,
        lower,
    })
}

/// Donchian(entry_n, exit_n): entry-period high and exit-period low.
pub fn donchian(
    high: &[f64],
    low: &[f64],
    entry_period: usize,
    exit_period: usize,
) -> Result<DonchianChannel, IndicatorError> {
    need(high.len(), entry_period.max(exit_period) + 1)?;
    Ok(DonchianChannel {
        upper: rolling_max(high, entry_period)?,
        lower: rolling_min(low, exit_period)?,
    })
}

/// Midpoint of the highest high and lowest low over a window.
pub fn midpoint(high: &[f64], low: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    let highs = rolling_max(high, period)?;
    let lows = rolling_min(low, period)?;
    Ok(highs
        .iter()
        .zip(lows.iter())
        .map(|(h, l)| (h + l) / 2.0)
        .collect())
}

/// Ichimoku(9, 26, 52, 26).
pub fn ichimoku(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    tenkan_period: usize,
    kijun_period: usize,
    senkou_b_period: usize,
    displacement: usize,
) -> Result<IchimokuCloud, IndicatorError> {
    need(close.len(), senkou_b_period + displacement)?;

    let len = close.len();
    let tenkan = midpoint(high, low, tenkan_period)?;
    let kijun = midpoint(high, low, kijun_period)?;
    let senkou_b_raw = midpoint(high, low, senkou_b_period)?;

    // Senkou spans apply `displacement` bars ahead of where they were
    // computed.
    let mut senkou_a = nan_vec(len);
    let mut senkou_b = nan_vec(len);
    for i in displacement..len {
        let src = i - displacement;
        if !tenkan[src].is_nan() && !kijun[src].is_nan() {
            senkou_a[i] = (tenkan[src] + kijun[src]) / 2.0;
        }
        senkou_b[i] = senkou_b_raw[src];
    }

    // Chikou is the close displaced backward.
    let mut chikou = nan_vec(len);
    for i in 0..len.saturating_sub(displacement) {
        chikou[i] = close[i + displacement];
    }

    Ok(IchimokuCloud {
        tenkan,
        kijun,
        senkou_a,
        senkou_b,
        chikou,
    })
}

/// Cumulative volume-weighted average price over the supplied window.
pub fn vwap(
    high: &[f64],
    low: &[f64],
    close: &[f64],
    volume: &[f64],
) -> Result<Vec<f64>, IndicatorError> {
    need(close.len(), 2)?;

    let mut out = Vec::with_capacity(close.len());
    let mut cum_pv = 0.0;
    let mut cum_v = 0.0;
    for i in 0..close.len() {
        let typical = (high[i] + low[i] + close[i]) / 3.0;
        cum_pv += typical * volume[i];
        cum_v += volume[i];
        out.push(if cum_v == 0.0 { typical } else { cum_pv / cum_v });
    }
    Ok(out)
}

/// N-period rate of change: (v_t − v_{t−n}) / v_{t−n}.
pub fn roc(values: &[f64], period: usize) -> Result<Vec<f64>, IndicatorError> {
    check_period("period", period)?;
    need(values.len(), period + 1)?;

    let mut out = nan_vec(values.len());
    for i in period..values.len() {
        let base = values[i - period];
        if base != 0.0 {
            out[i] = (values[i] - base) / base;
        }
    }
    Ok(out)
}
