//! Per-strategy check pipeline: the unit of work the scheduler dispatches.
//!
//! For one due strategy: fetch bars, compute indicators, generate signals
//! per symbol, route actionable ones through the executor, and report what
//! happened. A failing symbol never aborts the rest of the list.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use tw_data::{BarQuery, MarketDataSource, StateStore};
use tw_ta::{build_snapshot, generate, required_history};
use tw_types::{
    Clock, IndicatorError, LiveStatus, LiveStrategy, LiveStrategyDiff, Notification,
    NotificationKind, NotificationPriority, NotificationSink, SignalRecord, SignalType,
    Timeframe,
};

use crate::broker::BrokerRouter;
use crate::executor::{ExecutorOpts, SignalExecutor};
use crate::{CancelFlag, BROKER_TIMEOUT_SECS, MARKET_DATA_TIMEOUT_SECS, STORE_TIMEOUT_SECS};

/// Everything a check needs. Shared by the scheduler and control surface.
pub struct CheckDeps {
    pub store: Arc<dyn StateStore>,
    pub data: Arc<dyn MarketDataSource>,
    pub brokers: Arc<BrokerRouter>,
    pub executor: Arc<SignalExecutor>,
    pub notifier: Arc<dyn NotificationSink>,
    pub clock: Arc<dyn Clock>,
    /// Bar timeframe used for live checks.
    pub timeframe: Timeframe,
}

/// Outcome of one per-strategy check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CheckReport {
    pub symbols_total: usize,
    pub symbols_failed: usize,
    pub symbols_skipped: usize,
    pub signals: usize,
    pub executed: usize,
    /// Set when the check could not run at all.
    pub fatal: Option<String>,
}

impl CheckReport {
    /// A failed tick: nothing was evaluated and at least one thing went
    /// wrong.
    pub fn is_failure(&self) -> bool {
        self.fatal.is_some()
            || (self.symbols_total > 0 && self.symbols_failed == self.symbols_total)
    }
}

/// Run one check for one live strategy.
pub async fn run_check(deps: &CheckDeps, live: &LiveStrategy, cancel: &CancelFlag) -> CheckReport {
    let mut report = CheckReport {
        symbols_total: live.symbols.len(),
        ..Default::default()
    };
    let now = deps.clock.now();

    // Advance the check clock before any work so a crashed worker still
    // moves the cadence forward.
    if let Err(e) = deps
        .store
        .apply_strategy_diff(live.id, LiveStrategyDiff::checked(now))
        .await
    {
        report.fatal = Some(format!("cannot advance last_check: {e}"));
        return report;
    }

    // Resolve the template. A dangling reference is state corruption: the
    // instance goes to ERROR and the owner is told.
    let strategy = match deps.store.get_strategy(live.strategy_id).await {
        Ok(strategy) => strategy,
        Err(e) => {
            let message = format!("strategy template {} missing: {e}", live.strategy_id);
            let diff = LiveStrategyDiff {
                errors: 1,
                last_error: Some(message.clone()),
                set_status: Some(LiveStatus::Error),
                ..Default::default()
            };
            let _ = deps.store.apply_strategy_diff(live.id, diff).await;
            deps.notifier
                .notify(Notification::new(
                    &live.owner,
                    NotificationKind::StrategyError,
                    NotificationPriority::High,
                    "Strategy stopped: state corruption",
                    &message,
                ))
                .await;
            report.fatal = Some(message);
            return report;
        }
    };

    let broker = match deps.brokers.get(&live.owner) {
        Some(broker) => broker,
        None => {
            let message = format!("no broker registered for owner {}", live.owner);
            let diff = LiveStrategyDiff {
                errors: 1,
                last_error: Some(message.clone()),
                set_status: Some(LiveStatus::Error),
                ..Default::default()
            };
            let _ = deps.store.apply_strategy_diff(live.id, diff).await;
            deps.notifier
                .notify(Notification::new(
                    &live.owner,
                    NotificationKind::StrategyError,
                    NotificationPriority::High,
                    "Strategy stopped: broker credentials missing",
                    &message,
                ))
                .await;
            report.fatal = Some(message);
            return report;
        }
    };

    // One position snapshot per check; per-symbol lookups read from it.
    let positions = match tokio::time::timeout(
        Duration::from_secs(BROKER_TIMEOUT_SECS),
        broker.list_positions(),
    )
    .await
    {
        Ok(Ok(positions)) => positions,
        Ok(Err(e)) => {
            let message = format!("cannot list positions: {e}");
            let _ = deps
                .store
                .apply_strategy_diff(live.id, LiveStrategyDiff::error(&message))
                .await;
            report.fatal = Some(message);
            return report;
        }
        Err(_) => {
            let message = format!("position listing timed out after {BROKER_TIMEOUT_SECS} s");
            let _ = deps
                .store
                .apply_strategy_diff(live.id, LiveStrategyDiff::error(&message))
                .await;
            report.fatal = Some(message);
            return report;
        }
    };

    let needed = required_history(strategy.strategy_type, &strategy.parameters);

    for symbol in &live.symbols {
        if cancel.is_cancelled() {
            debug!(strategy = %live.name, "check cancelled, stopping symbol loop");
            break;
        }

        let query = BarQuery::new(symbol, deps.timeframe).last(needed);
        let bars = match tokio::time::timeout(
            Duration::from_secs(MARKET_DATA_TIMEOUT_SECS),
            deps.data.get_bars(&query),
        )
        .await
        {
            Ok(Ok(bars)) => bars,
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "bar fetch failed");
                report.symbols_failed += 1;
                let _ = deps
                    .store
                    .apply_strategy_diff(
                        live.id,
                        LiveStrategyDiff::error(&format!("{symbol}: {e}")),
                    )
                    .await;
                continue;
            }
            Err(_) => {
                warn!(symbol = %symbol, "bar fetch timed out");
                report.symbols_failed += 1;
                let _ = deps
                    .store
                    .apply_strategy_diff(
                        live.id,
                        LiveStrategyDiff::error(&format!(
                            "{symbol}: market data timeout after {MARKET_DATA_TIMEOUT_SECS} s"
                        )),
                    )
                    .await;
                continue;
            }
        };

        let snapshot = match build_snapshot(strategy.strategy_type, &strategy.parameters, &bars)
        {
            Ok(snapshot) => snapshot,
            Err(IndicatorError::InsufficientData { required, got }) => {
                debug!(
                    symbol = %symbol,
                    required,
                    got,
                    "insufficient history, skipping symbol"
                );
                report.symbols_skipped += 1;
                continue;
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "indicator computation failed");
                report.symbols_failed += 1;
                let _ = deps
                    .store
                    .apply_strategy_diff(
                        live.id,
                        LiveStrategyDiff::error(&format!("{symbol}: {e}")),
                    )
                    .await;
                continue;
            }
        };

        let has_position = positions
            .iter()
            .any(|p| &p.symbol == symbol && p.quantity > rust_decimal::Decimal::ZERO);

        let decision = generate(
            strategy.strategy_type,
            &strategy.parameters,
            &snapshot,
            has_position,
        );
        let record = SignalRecord::new(
            live.id,
            symbol,
            deps.clock.now(),
            decision.signal,
            decision.strength,
            decision.reasoning,
            snapshot.to_map(),
        );

        let persist = async {
            deps.store.insert_signal(record.clone()).await?;
            if record.signal_type != SignalType::Hold {
                deps.store
                    .apply_strategy_diff(live.id, LiveStrategyDiff::signal(record.timestamp))
                    .await?;
            }
            Ok::<(), tw_types::StoreError>(())
        };
        match tokio::time::timeout(Duration::from_secs(STORE_TIMEOUT_SECS), persist).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(symbol = %symbol, error = %e, "signal persistence failed");
                report.symbols_failed += 1;
                continue;
            }
            Err(_) => {
                warn!(symbol = %symbol, "signal persistence timed out");
                report.symbols_failed += 1;
                continue;
            }
        }

        if record.signal_type != SignalType::Hold {
            report.signals += 1;
            info!(
                strategy = %live.name,
                symbol = %symbol,
                signal = %record.signal_type,
                strength = record.strength,
                "signal generated"
            );

            if live.auto_execute {
                let result = deps
                    .executor
                    .execute(&record, live, &ExecutorOpts::default(), cancel)
                    .await;
                if result.success {
                    report.executed += 1;
                } else if result.deferred {
                    debug!(symbol = %symbol, "execution deferred to next check");
                } else if let Some(error) = &result.error {
                    warn!(symbol = %symbol, error = %error, "execution failed");
                }
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ExecutorDeps, PeakTracker};
    use crate::paper::{PaperBroker, PaperBrokerConfig};
    use crate::ratelimit::{OwnerRateLimiter, RateLimiterConfig};
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use tw_data::{synthetic, MemoryDataSource, MemoryStateStore};
    use tw_types::{
        CollectingSink, Parameters, RetryConfig, RiskSettings, Strategy, StrategyType,
        SystemClock,
    };
    use uuid::Uuid;

    struct Fixture {
        deps: CheckDeps,
        store: Arc<MemoryStateStore>,
        data: Arc<MemoryDataSource>,
        notifier: Arc<CollectingSink>,
        live: LiveStrategy,
    }

    async fn fixture(auto_execute: bool) -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let data = Arc::new(MemoryDataSource::new());
        let brokers = Arc::new(BrokerRouter::new());
        let notifier = Arc::new(CollectingSink::new());
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // Downtrending closes pin RSI low: the strategy emits BUY.
        let closes: Vec<f64> = (0..60).map(|i| 100.0 - i as f64 * 0.8).collect();
        let bars = synthetic::bars_from_closes(Utc::now() - ChronoDuration::days(60), &closes);
        data.insert("AAPL", Timeframe::OneDay, bars);

        let paper = Arc::new(PaperBroker::new(PaperBrokerConfig {
            slippage_pct: dec!(0),
            ..Default::default()
        }));
        paper.set_price("AAPL", dec!(52.8));
        brokers.register("alice", paper);

        let strategy = Strategy::new("alice", "dip buyer", StrategyType::Rsi)
            .with_parameters(Parameters::new().with("period", 14));
        store.insert_strategy(strategy.clone()).await.unwrap();

        let mut live = LiveStrategy::new("alice", strategy.id, "dip buyer live", vec!["AAPL".into()]);
        live.status = LiveStatus::Active;
        live.auto_execute = auto_execute;
        store.insert_live_strategy(live.clone()).await.unwrap();

        let executor = Arc::new(SignalExecutor::new(
            ExecutorDeps {
                store: store.clone(),
                brokers: brokers.clone(),
                notifier: notifier.clone(),
                clock: clock.clone(),
                rate_limiter: Arc::new(OwnerRateLimiter::new(
                    RateLimiterConfig::default(),
                    clock.clone(),
                )),
                peaks: Arc::new(PeakTracker::new()),
            },
            RetryConfig::default(),
            RiskSettings::default(),
        ));

        let deps = CheckDeps {
            store: store.clone(),
            data: data.clone(),
            brokers,
            executor,
            notifier: notifier.clone(),
            clock,
            timeframe: Timeframe::OneDay,
        };

        Fixture {
            deps,
            store,
            data,
            notifier,
            live,
        }
    }

    #[tokio::test]
    async fn test_check_generates_and_executes_signal() {
        let f = fixture(true).await;
        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;

        assert!(!report.is_failure());
        assert_eq!(report.signals, 1);
        assert_eq!(report.executed, 1);

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert!(live.last_check.is_some());
        assert_eq!(live.total_signals, 1);
        assert_eq!(live.executed_trades, 1);

        let signals = f.store.signals_for(f.live.id, 10).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Buy);
        assert!(signals[0].executed);
    }

    #[tokio::test]
    async fn test_auto_execute_off_only_records() {
        let f = fixture(false).await;
        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;

        assert_eq!(report.signals, 1);
        assert_eq!(report.executed, 0);

        let signals = f.store.signals_for(f.live.id, 10).await.unwrap();
        assert!(!signals[0].executed);
        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.executed_trades, 0);
    }

    #[tokio::test]
    async fn test_insufficient_history_skips_without_error() {
        let f = fixture(true).await;
        // Replace the series with one shorter than the warm-up.
        f.data.insert(
            "AAPL",
            Timeframe::OneDay,
            synthetic::random_walk("AAPL", Utc::now(), 5, 100.0, 1),
        );

        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;
        assert_eq!(report.symbols_skipped, 1);
        assert_eq!(report.symbols_failed, 0);
        assert!(!report.is_failure());

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.error_count, 0);
        assert!(live.last_check.is_some());
        assert!(f.store.signals_for(f.live.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fetch_failure_counts_error_and_advances_clock() {
        let mut f = fixture(true).await;
        f.live.symbols = vec!["ZZZZ".into()];
        f.store.update_live_strategy(f.live.clone()).await.unwrap();

        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;
        assert_eq!(report.symbols_failed, 1);
        assert!(report.is_failure());

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.error_count, 1);
        assert!(live.last_error.is_some());
        assert!(live.last_check.is_some(), "clock advances even on failure");
        assert!(f.store.signals_for(f.live.id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_one_bad_symbol_does_not_stop_the_rest() {
        let mut f = fixture(true).await;
        f.live.symbols = vec!["ZZZZ".into(), "AAPL".into()];
        f.store.update_live_strategy(f.live.clone()).await.unwrap();

        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;
        assert_eq!(report.symbols_failed, 1);
        assert_eq!(report.signals, 1);
        assert!(!report.is_failure());
    }

    #[tokio::test]
    async fn test_missing_template_is_state_corruption() {
        let mut f = fixture(true).await;
        f.live.strategy_id = Uuid::new_v4(); // dangling
        f.store.update_live_strategy(f.live.clone()).await.unwrap();

        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;
        assert!(report.is_failure());

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.status, LiveStatus::Error);
        assert!(live.last_error.is_some());

        let notifications = f.notifier.all();
        assert!(notifications
            .iter()
            .any(|n| n.priority == NotificationPriority::High));
    }

    #[tokio::test]
    async fn test_cancelled_check_stops_before_symbols() {
        let f = fixture(true).await;
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = run_check(&f.deps, &f.live, &cancel).await;
        assert_eq!(report.signals, 0);
        assert_eq!(report.executed, 0);
        // last_check still advanced: the check was accepted before cancel.
        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert!(live.last_check.is_some());
    }

    #[tokio::test]
    async fn test_hold_signal_is_persisted_without_counting() {
        let f = fixture(true).await;
        // Flat series: RSI hovers mid-range, the strategy holds.
        let closes: Vec<f64> = (0..60)
            .map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        f.data.insert(
            "AAPL",
            Timeframe::OneDay,
            synthetic::bars_from_closes(Utc::now() - ChronoDuration::days(60), &closes),
        );

        let report = run_check(&f.deps, &f.live, &CancelFlag::new()).await;
        assert_eq!(report.signals, 0);

        let signals = f.store.signals_for(f.live.id, 10).await.unwrap();
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].signal_type, SignalType::Hold);
        assert_eq!(signals[0].strength, 0.0);

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.total_signals, 0);
    }
}
