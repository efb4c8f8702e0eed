use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// The closed set of strategy types the signal generator can evaluate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StrategyType {
    SmaCrossover,
    Rsi,
    Macd,
    BollingerBands,
    MeanReversion,
    Vwap,
    Momentum,
    Breakout,
    PairsTrading,
    Stochastic,
    KeltnerChannel,
    AtrTrailingStop,
    DonchianChannel,
    IchimokuCloud,
}

impl StrategyType {
    /// Every supported strategy type, in declaration order.
    pub const ALL: [StrategyType; 14] = [
        StrategyType::SmaCrossover,
        StrategyType::Rsi,
        StrategyType::Macd,
        StrategyType::BollingerBands,
        StrategyType::MeanReversion,
        StrategyType::Vwap,
        StrategyType::Momentum,
        StrategyType::Breakout,
        StrategyType::PairsTrading,
        StrategyType::Stochastic,
        StrategyType::KeltnerChannel,
        StrategyType::AtrTrailingStop,
        StrategyType::DonchianChannel,
        StrategyType::IchimokuCloud,
    ];
}

impl fmt::Display for StrategyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StrategyType::SmaCrossover => "SMA_CROSSOVER",
            StrategyType::Rsi => "RSI",
            StrategyType::Macd => "MACD",
            StrategyType::BollingerBands => "BOLLINGER_BANDS",
            StrategyType::MeanReversion => "MEAN_REVERSION",
            StrategyType::Vwap => "VWAP",
            StrategyType::Momentum => "MOMENTUM",
            StrategyType::Breakout => "BREAKOUT",
            StrategyType::PairsTrading => "PAIRS_TRADING",
            StrategyType::Stochastic => "STOCHASTIC",
            StrategyType::KeltnerChannel => "KELTNER_CHANNEL",
            StrategyType::AtrTrailingStop => "ATR_TRAILING_STOP",
            StrategyType::DonchianChannel => "DONCHIAN_CHANNEL",
            StrategyType::IchimokuCloud => "ICHIMOKU_CLOUD",
        };
        write!(f, "{s}")
    }
}

/// Opaque key → scalar parameter map with typed accessors.
///
/// The accepted keys are enumerated per strategy type by the signal
/// generator; unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Parameters(BTreeMap<String, serde_json::Value>);

impl Parameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> &mut Self {
        self.0.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }

    pub fn with<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.set(key, value);
        self
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_usize(&self, key: &str) -> Option<usize> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.get_f64(key).unwrap_or(default)
    }

    pub fn usize_or(&self, key: &str, default: usize) -> usize {
        self.get_usize(key).unwrap_or(default)
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &serde_json::Value)> {
        self.0.iter()
    }
}

/// A user-authored strategy template: a named indicator configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub id: Uuid,
    pub owner: String,
    pub name: String,
    pub strategy_type: StrategyType,
    pub parameters: Parameters,
    /// Default symbol list used when a live deployment doesn't override it.
    pub symbols: Vec<String>,
}

impl Strategy {
    pub fn new(owner: &str, name: &str, strategy_type: StrategyType) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            name: name.to_string(),
            strategy_type,
            parameters: Parameters::new(),
            symbols: Vec::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_symbols(mut self, symbols: Vec<String>) -> Self {
        self.symbols = symbols;
        self
    }
}

/// Lifecycle state of a running strategy instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveStatus {
    Active,
    Paused,
    Stopped,
    Error,
}

impl fmt::Display for LiveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LiveStatus::Active => "ACTIVE",
            LiveStatus::Paused => "PAUSED",
            LiveStatus::Stopped => "STOPPED",
            LiveStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

/// A strategy template bound to a live execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveStrategy {
    pub id: Uuid,
    pub owner: String,
    pub strategy_id: Uuid,
    pub name: String,
    pub symbols: Vec<String>,
    pub status: LiveStatus,
    /// Cadence floor in seconds; the scheduler never checks more often.
    pub check_interval_secs: u64,
    pub auto_execute: bool,
    pub max_positions: u32,
    /// Fraction of buying power allocated per position (0 < p ≤ 1).
    pub position_size_pct: Decimal,
    /// Absolute cash cap per position.
    pub max_position_size: Option<Decimal>,
    pub daily_loss_limit: Option<Decimal>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub total_signals: u64,
    pub executed_trades: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    /// Per-strategy scratchpad, opaque to the scheduler.
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LiveStrategy {
    pub fn new(owner: &str, strategy_id: Uuid, name: &str, symbols: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            strategy_id,
            name: name.to_string(),
            symbols,
            status: LiveStatus::Paused,
            check_interval_secs: 300,
            auto_execute: false,
            max_positions: 5,
            position_size_pct: Decimal::new(2, 2), // 2%
            max_position_size: None,
            daily_loss_limit: None,
            last_check: None,
            last_signal_at: None,
            last_trade_at: None,
            total_signals: 0,
            executed_trades: 0,
            error_count: 0,
            last_error: None,
            state: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Validate the invariants the control surface must enforce before the
    /// instance can be scheduled.
    pub fn validate(&self, min_check_interval_secs: u64) -> Result<(), String> {
        if self.symbols.is_empty() {
            return Err("symbol list must be non-empty".into());
        }
        if self.check_interval_secs < min_check_interval_secs {
            return Err(format!(
                "check interval {}s below minimum {}s",
                self.check_interval_secs, min_check_interval_secs
            ));
        }
        if self.position_size_pct <= Decimal::ZERO || self.position_size_pct > Decimal::ONE {
            return Err(format!(
                "position_size_pct {} outside (0, 1]",
                self.position_size_pct
            ));
        }
        Ok(())
    }

    /// Whether this strategy is due for a check at `now`.
    ///
    /// Cadence is a floor, not a deadline: a never-checked strategy is due
    /// immediately, otherwise only once the interval has fully elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_check {
            None => true,
            Some(last) => now - last >= Duration::seconds(self.check_interval_secs as i64),
        }
    }

    /// Transition to ERROR. Always records the cause.
    pub fn mark_error(&mut self, message: &str) {
        self.status = LiveStatus::Error;
        self.last_error = Some(message.to_string());
    }

    /// Merge a counter/timestamp diff produced by the executor or pipeline.
    pub fn apply_diff(&mut self, diff: &LiveStrategyDiff) {
        self.total_signals += diff.signals;
        self.executed_trades += diff.executed_trades;
        self.error_count += diff.errors;
        if let Some(ts) = diff.last_check {
            self.last_check = Some(ts);
        }
        if let Some(ts) = diff.last_signal_at {
            self.last_signal_at = Some(ts);
        }
        if let Some(ts) = diff.last_trade_at {
            self.last_trade_at = Some(ts);
        }
        if let Some(ref err) = diff.last_error {
            self.last_error = Some(err.clone());
        }
        if let Some(status) = diff.set_status {
            self.status = status;
            if status == LiveStatus::Error && self.last_error.is_none() {
                self.last_error = Some("unspecified error".into());
            }
        }
    }
}

/// Counter and timestamp increments for one LiveStrategy.
///
/// Components never hold long-lived references to a LiveStrategy; they pass
/// diffs and the state store serialises the writes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveStrategyDiff {
    pub signals: u64,
    pub executed_trades: u64,
    pub errors: u64,
    pub last_check: Option<DateTime<Utc>>,
    pub last_signal_at: Option<DateTime<Utc>>,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub set_status: Option<LiveStatus>,
}

impl LiveStrategyDiff {
    /// Diff for a freshly generated signal.
    pub fn signal(at: DateTime<Utc>) -> Self {
        Self {
            signals: 1,
            last_signal_at: Some(at),
            ..Default::default()
        }
    }

    /// Diff for a successfully executed trade.
    pub fn trade(at: DateTime<Utc>) -> Self {
        Self {
            executed_trades: 1,
            last_trade_at: Some(at),
            ..Default::default()
        }
    }

    /// Diff for a failed check or execution.
    pub fn error(message: &str) -> Self {
        Self {
            errors: 1,
            last_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Diff advancing the check clock.
    pub fn checked(at: DateTime<Utc>) -> Self {
        Self {
            last_check: Some(at),
            ..Default::default()
        }
    }

    /// Fold another diff into this one.
    pub fn merge(&mut self, other: LiveStrategyDiff) {
        self.signals += other.signals;
        self.executed_trades += other.executed_trades;
        self.errors += other.errors;
        self.last_check = other.last_check.or(self.last_check);
        self.last_signal_at = other.last_signal_at.or(self.last_signal_at);
        self.last_trade_at = other.last_trade_at.or(self.last_trade_at);
        if other.last_error.is_some() {
            self.last_error = other.last_error;
        }
        if other.set_status.is_some() {
            self.set_status = other.set_status;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_live() -> LiveStrategy {
        LiveStrategy::new("alice", Uuid::new_v4(), "rsi-dip", vec!["AAPL".into()])
    }

    #[test]
    fn test_strategy_type_serde_tokens() {
        let json = serde_json::to_string(&StrategyType::SmaCrossover).unwrap();
        assert_eq!(json, "\"SMA_CROSSOVER\"");
        let back: StrategyType = serde_json::from_str("\"ATR_TRAILING_STOP\"").unwrap();
        assert_eq!(back, StrategyType::AtrTrailingStop);
    }

    #[test]
    fn test_parameters_typed_accessors() {
        let params = Parameters::new()
            .with("period", 14)
            .with("oversold", 30.0)
            .with("use_system_2", true)
            .with("mode", "breakout");

        assert_eq!(params.get_usize("period"), Some(14));
        assert_eq!(params.f64_or("oversold", 0.0), 30.0);
        assert!(params.bool_or("use_system_2", false));
        assert_eq!(params.get_str("mode"), Some("breakout"));
        // Missing keys fall back
        assert_eq!(params.usize_or("missing", 7), 7);
    }

    #[test]
    fn test_validate_rejects_empty_symbols() {
        let mut live = sample_live();
        live.symbols.clear();
        assert!(live.validate(60).is_err());
    }

    #[test]
    fn test_validate_rejects_fast_cadence() {
        let mut live = sample_live();
        live.check_interval_secs = 30;
        assert!(live.validate(60).is_err());
        live.check_interval_secs = 60;
        assert!(live.validate(60).is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_position_size() {
        let mut live = sample_live();
        live.position_size_pct = dec!(0);
        assert!(live.validate(60).is_err());
        live.position_size_pct = dec!(1.5);
        assert!(live.validate(60).is_err());
        live.position_size_pct = dec!(1);
        assert!(live.validate(60).is_ok());
    }

    #[test]
    fn test_is_due_without_last_check() {
        let live = sample_live();
        assert!(live.is_due(Utc::now()));
    }

    #[test]
    fn test_is_due_respects_interval() {
        let mut live = sample_live();
        live.check_interval_secs = 300;
        let t0 = Utc::now();
        live.last_check = Some(t0);

        assert!(!live.is_due(t0 + Duration::seconds(60)));
        assert!(!live.is_due(t0 + Duration::seconds(299)));
        assert!(live.is_due(t0 + Duration::seconds(300)));
    }

    #[test]
    fn test_mark_error_sets_last_error() {
        let mut live = sample_live();
        live.mark_error("broker unreachable");
        assert_eq!(live.status, LiveStatus::Error);
        assert_eq!(live.last_error.as_deref(), Some("broker unreachable"));
    }

    #[test]
    fn test_apply_diff_accumulates_counters() {
        let mut live = sample_live();
        let now = Utc::now();

        live.apply_diff(&LiveStrategyDiff::signal(now));
        live.apply_diff(&LiveStrategyDiff::signal(now));
        live.apply_diff(&LiveStrategyDiff::trade(now));
        live.apply_diff(&LiveStrategyDiff::error("timeout"));

        assert_eq!(live.total_signals, 2);
        assert_eq!(live.executed_trades, 1);
        assert_eq!(live.error_count, 1);
        assert_eq!(live.last_error.as_deref(), Some("timeout"));
        assert_eq!(live.last_signal_at, Some(now));
    }

    #[test]
    fn test_diff_merge() {
        let now = Utc::now();
        let mut diff = LiveStrategyDiff::checked(now);
        diff.merge(LiveStrategyDiff::signal(now));
        diff.merge(LiveStrategyDiff::error("oops"));

        assert_eq!(diff.signals, 1);
        assert_eq!(diff.errors, 1);
        assert_eq!(diff.last_check, Some(now));
        assert_eq!(diff.last_error.as_deref(), Some("oops"));
    }
}
