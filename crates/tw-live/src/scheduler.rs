//! Strategy scheduler: owns every live strategy and wakes the due ones.
//!
//! One cooperative tick loop; per-strategy checks run in parallel inside a
//! bounded worker pool. An in-memory in-flight set guarantees at most one
//! concurrent check per strategy, and cadence is a floor: a busy tick just
//! pushes the next check to the first tick at or after
//! `last_check + check_interval`.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tw_types::{
    LiveStatus, LiveStrategyDiff, Notification, NotificationKind, NotificationPriority,
    SchedulerConfig, TwError, TwResult,
};

use crate::pipeline::{run_check, CheckDeps};
use crate::CancelFlag;

/// Consecutive failed checks before a strategy is parked in ERROR.
pub const MAX_CONSECUTIVE_FAILURES: u32 = 5;
/// Consecutive tick-loop failures before the process gives up so the
/// supervisor can restart it.
pub const MAX_TICK_FAILURES: u32 = 10;
/// Grace period for in-flight checks on shutdown.
pub const SHUTDOWN_DRAIN_SECS: u64 = 30;

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub active: usize,
    pub due: usize,
    pub submitted: usize,
    /// Checks still running when the tick deadline elapsed. They keep
    /// their in-flight slot until they finish.
    pub overrun: usize,
}

/// The per-process scheduler.
pub struct StrategyScheduler {
    deps: Arc<CheckDeps>,
    config: SchedulerConfig,
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
    pool: Arc<Semaphore>,
    consecutive_failures: Arc<Mutex<HashMap<Uuid, u32>>>,
    cancel: CancelFlag,
}

impl StrategyScheduler {
    pub fn new(deps: CheckDeps, config: SchedulerConfig) -> Self {
        let pool = Arc::new(Semaphore::new(config.worker_pool_size.max(1)));
        Self {
            deps: Arc::new(deps),
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            pool,
            consecutive_failures: Arc::new(Mutex::new(HashMap::new())),
            cancel: CancelFlag::new(),
        }
    }

    /// Handle used to request shutdown from outside the run loop.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Number of checks currently in flight.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// One scheduler tick: query ACTIVE strategies, submit the due ones,
    /// wait for completion up to twice the tick period.
    pub async fn tick_once(&self) -> TwResult<TickSummary> {
        if self.cancel.is_cancelled() {
            return Ok(TickSummary::default());
        }

        let strategies = self
            .deps
            .store
            .list_live_strategies(Some(LiveStatus::Active), None)
            .await?;
        let now = self.deps.clock.now();

        let mut summary = TickSummary {
            active: strategies.len(),
            ..Default::default()
        };

        let mut handles = Vec::new();
        for live in strategies {
            if !live.is_due(now) {
                continue;
            }
            summary.due += 1;

            // Per-strategy serialisation: skip anything still in flight
            // from an earlier tick.
            if !self.in_flight.lock().insert(live.id) {
                debug!(strategy = %live.name, "previous check still running, skipping");
                continue;
            }
            summary.submitted += 1;

            let deps = self.deps.clone();
            let in_flight = self.in_flight.clone();
            let consecutive = self.consecutive_failures.clone();
            let pool = self.pool.clone();
            let cancel = self.cancel.clone();

            handles.push(tokio::spawn(async move {
                // Bounded pool: excess checks queue here.
                let _permit = pool.acquire_owned().await.ok();
                let live_id = live.id;
                let report = run_check(&deps, &live, &cancel).await;

                let failures = {
                    let mut map = consecutive.lock();
                    if report.is_failure() {
                        let entry = map.entry(live_id).or_insert(0);
                        *entry += 1;
                        *entry
                    } else {
                        map.remove(&live_id);
                        0
                    }
                };

                if failures >= MAX_CONSECUTIVE_FAILURES {
                    let message = format!("{failures} consecutive failed checks");
                    warn!(strategy = %live.name, %message, "parking strategy in ERROR");
                    let diff = LiveStrategyDiff {
                        last_error: Some(message.clone()),
                        set_status: Some(LiveStatus::Error),
                        ..Default::default()
                    };
                    if let Err(e) = deps.store.apply_strategy_diff(live_id, diff).await {
                        error!(error = %e, "failed to park strategy in ERROR");
                    }
                    deps.notifier
                        .notify(Notification::new(
                            &live.owner,
                            NotificationKind::StrategyError,
                            NotificationPriority::High,
                            "Strategy halted after repeated failures",
                            &message,
                        ))
                        .await;
                    consecutive.lock().remove(&live_id);
                }

                in_flight.lock().remove(&live_id);
            }));
        }

        // The tick returns when every submitted unit finishes or the
        // deadline elapses; overruns keep running detached.
        let deadline = Duration::from_secs(self.config.tick_period_seconds.max(1) * 2);
        let wait_all = async {
            for handle in handles {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(deadline, wait_all).await.is_err() {
            summary.overrun = self.in_flight.lock().len();
            warn!(overrun = summary.overrun, "tick deadline elapsed with checks in flight");
        }

        debug!(
            active = summary.active,
            due = summary.due,
            submitted = summary.submitted,
            overrun = summary.overrun,
            "tick complete"
        );
        Ok(summary)
    }

    /// The scheduler loop. Returns an error only after repeated tick
    /// failures, at which point the process should exit and be restarted
    /// by its supervisor.
    pub async fn run(&self) -> TwResult<()> {
        info!(
            tick_seconds = self.config.tick_period_seconds,
            workers = self.config.worker_pool_size,
            "strategy scheduler started"
        );

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_period_seconds.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick_failures = 0u32;

        loop {
            interval.tick().await;
            if self.cancel.is_cancelled() {
                break;
            }

            match self.tick_once().await {
                Ok(_) => tick_failures = 0,
                Err(e) => {
                    tick_failures += 1;
                    error!(error = %e, consecutive = tick_failures, "scheduler tick failed");
                    if tick_failures >= MAX_TICK_FAILURES {
                        error!(
                            "FATAL: {MAX_TICK_FAILURES} consecutive tick failures, \
                             exiting for supervisor restart"
                        );
                        return Err(TwError::Scheduler(format!(
                            "{tick_failures} consecutive tick-loop failures"
                        )));
                    }
                }
            }
        }

        info!("strategy scheduler stopped");
        Ok(())
    }

    /// Graceful shutdown: stop submitting, give in-flight checks up to 30 s
    /// to finish. Workers observe the cancel flag at every suspension point.
    pub async fn shutdown(&self) {
        self.cancel.cancel();

        let deadline = Instant::now() + Duration::from_secs(SHUTDOWN_DRAIN_SECS);
        while Instant::now() < deadline {
            if self.in_flight.lock().is_empty() {
                info!("scheduler drained cleanly");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        warn!(
            remaining = self.in_flight.lock().len(),
            "shutdown drain timed out, abandoning in-flight checks"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::BrokerRouter;
    use crate::executor::{ExecutorDeps, PeakTracker, SignalExecutor};
    use crate::paper::{PaperBroker, PaperBrokerConfig};
    use crate::ratelimit::{OwnerRateLimiter, RateLimiterConfig};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;
    use tw_data::{synthetic, BarQuery, MarketDataSource, MemoryDataSource, MemoryStateStore, StateStore};
    use tw_types::{
        Bar, Clock, CollectingSink, LiveStrategy, ManualClock, MarketDataError, Parameters,
        RetryConfig, RiskSettings, Strategy, StrategyType, Timeframe,
    };

    /// Wraps a data source, counting fetches and optionally blocking until
    /// released.
    struct InstrumentedSource {
        inner: MemoryDataSource,
        fetches: PlMutex<usize>,
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl MarketDataSource for InstrumentedSource {
        async fn get_bars(&self, query: &BarQuery) -> Result<Vec<Bar>, MarketDataError> {
            *self.fetches.lock() += 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.inner.get_bars(query).await
        }
    }

    struct Fixture {
        scheduler: StrategyScheduler,
        store: Arc<MemoryStateStore>,
        source: Arc<InstrumentedSource>,
        notifier: Arc<CollectingSink>,
        clock: Arc<ManualClock>,
        live: LiveStrategy,
    }

    async fn fixture(symbols: Vec<String>, check_interval: u64, gate: Option<Arc<Notify>>) -> Fixture {
        let store = Arc::new(MemoryStateStore::new());
        let notifier = Arc::new(CollectingSink::new());
        let clock = ManualClock::new(Utc::now());

        let inner = MemoryDataSource::new();
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.4).sin() * 3.0).collect();
        inner.insert(
            "AAPL",
            Timeframe::OneDay,
            synthetic::bars_from_closes(Utc::now() - ChronoDuration::days(60), &closes),
        );
        let source = Arc::new(InstrumentedSource {
            inner,
            fetches: PlMutex::new(0),
            gate,
        });

        let brokers = Arc::new(BrokerRouter::new());
        let paper = Arc::new(PaperBroker::new(PaperBrokerConfig {
            slippage_pct: dec!(0),
            ..Default::default()
        }));
        paper.set_price("AAPL", dec!(100));
        brokers.register("alice", paper);

        let strategy = Strategy::new("alice", "dip buyer", StrategyType::Rsi)
            .with_parameters(Parameters::new().with("period", 14));
        store.insert_strategy(strategy.clone()).await.unwrap();

        let mut live = LiveStrategy::new("alice", strategy.id, "dip live", symbols);
        live.status = LiveStatus::Active;
        live.check_interval_secs = check_interval;
        store.insert_live_strategy(live.clone()).await.unwrap();

        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let executor = Arc::new(SignalExecutor::new(
            ExecutorDeps {
                store: store.clone(),
                brokers: brokers.clone(),
                notifier: notifier.clone(),
                clock: clock_dyn.clone(),
                rate_limiter: Arc::new(OwnerRateLimiter::new(
                    RateLimiterConfig::default(),
                    clock_dyn.clone(),
                )),
                peaks: Arc::new(PeakTracker::new()),
            },
            RetryConfig::default(),
            RiskSettings::default(),
        ));

        let deps = CheckDeps {
            store: store.clone(),
            data: source.clone(),
            brokers,
            executor,
            notifier: notifier.clone(),
            clock: clock_dyn,
            timeframe: Timeframe::OneDay,
        };

        let scheduler = StrategyScheduler::new(
            deps,
            SchedulerConfig {
                tick_period_seconds: 1,
                worker_pool_size: 4,
                min_check_interval_seconds: 60,
            },
        );

        Fixture {
            scheduler,
            store,
            source,
            notifier,
            clock,
            live,
        }
    }

    #[tokio::test]
    async fn test_cadence_is_a_floor() {
        let f = fixture(vec!["AAPL".into()], 300, None).await;

        // First tick: never checked → due immediately.
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.due, 1);
        assert_eq!(summary.submitted, 1);
        let after_first = f.store.get_live_strategy(f.live.id).await.unwrap();
        let first_check = after_first.last_check.unwrap();

        // 60 s and 120 s later: not due, last_check untouched.
        for _ in 0..2 {
            f.clock.advance(ChronoDuration::seconds(60));
            let summary = f.scheduler.tick_once().await.unwrap();
            assert_eq!(summary.due, 0);
            let live = f.store.get_live_strategy(f.live.id).await.unwrap();
            assert_eq!(live.last_check, Some(first_check));
        }

        // At t₀ + 300 s the strategy is due again.
        f.clock.advance(ChronoDuration::seconds(180));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.due, 1);
        assert_eq!(*f.source.fetches.lock(), 2);
    }

    #[tokio::test]
    async fn test_per_strategy_serialisation() {
        let gate = Arc::new(Notify::new());
        let f = fixture(vec!["AAPL".into()], 60, Some(gate.clone())).await;

        // First tick: the check blocks inside the data fetch. The tick
        // returns after its deadline with the check still in flight.
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(summary.overrun, 1);
        assert_eq!(f.scheduler.in_flight_count(), 1);

        // Interval elapsed, but the previous check is still running: no
        // second worker may start.
        f.clock.advance(ChronoDuration::seconds(120));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.due, 1);
        assert_eq!(summary.submitted, 0);
        assert_eq!(*f.source.fetches.lock(), 1, "no concurrent check started");

        // Release the gate and let the worker finish.
        gate.notify_waiters();
        for _ in 0..100 {
            if f.scheduler.in_flight_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(f.scheduler.in_flight_count(), 0);

        // Now a new check may start once the interval elapses again.
        f.clock.advance(ChronoDuration::seconds(120));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(*f.source.fetches.lock(), 2);
    }

    #[tokio::test]
    async fn test_repeated_failures_park_strategy_in_error() {
        // Unknown symbol: every check fails.
        let f = fixture(vec!["ZZZZ".into()], 60, None).await;

        for _ in 0..MAX_CONSECUTIVE_FAILURES {
            f.scheduler.tick_once().await.unwrap();
            f.clock.advance(ChronoDuration::seconds(120));
        }

        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.status, LiveStatus::Error);
        assert!(live
            .last_error
            .as_deref()
            .unwrap()
            .contains("consecutive failed checks"));

        let notifications = f.notifier.all();
        assert!(notifications
            .iter()
            .any(|n| n.priority == NotificationPriority::High
                && n.title.contains("halted")));

        // Parked strategies are no longer scheduled.
        f.clock.advance(ChronoDuration::seconds(120));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.active, 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let f = fixture(vec!["ZZZZ".into()], 60, None).await;

        // Fail a few times, then fix the symbol list.
        for _ in 0..3 {
            f.scheduler.tick_once().await.unwrap();
            f.clock.advance(ChronoDuration::seconds(120));
        }
        let mut live = f.store.get_live_strategy(f.live.id).await.unwrap();
        live.symbols = vec!["AAPL".into()];
        f.store.update_live_strategy(live).await.unwrap();

        for _ in 0..4 {
            f.scheduler.tick_once().await.unwrap();
            f.clock.advance(ChronoDuration::seconds(120));
        }

        // Still ACTIVE: the streak never reached the limit.
        let live = f.store.get_live_strategy(f.live.id).await.unwrap();
        assert_eq!(live.status, LiveStatus::Active);
    }

    #[tokio::test]
    async fn test_shutdown_stops_submissions_and_drains() {
        let gate = Arc::new(Notify::new());
        let f = fixture(vec!["AAPL".into()], 60, Some(gate.clone())).await;

        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(f.scheduler.in_flight_count(), 1);

        // Release the worker shortly after shutdown begins.
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            gate.notify_waiters();
        });

        f.scheduler.shutdown().await;
        release.await.unwrap();
        assert_eq!(f.scheduler.in_flight_count(), 0);

        // After shutdown no tick submits new work.
        f.clock.advance(ChronoDuration::seconds(600));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.submitted, 0);
    }

    #[tokio::test]
    async fn test_quick_deployed_strategy_picked_up_next_tick() {
        let f = fixture(vec!["AAPL".into()], 60, None).await;
        f.scheduler.tick_once().await.unwrap();

        // A second instance appears in the store mid-flight (quick-deploy).
        let strategy = Strategy::new("alice", "bands", StrategyType::BollingerBands);
        f.store.insert_strategy(strategy.clone()).await.unwrap();
        let mut second = LiveStrategy::new("alice", strategy.id, "bands live", vec!["AAPL".into()]);
        second.status = LiveStatus::Active;
        f.store.insert_live_strategy(second.clone()).await.unwrap();

        f.clock.advance(ChronoDuration::seconds(120));
        let summary = f.scheduler.tick_once().await.unwrap();
        assert_eq!(summary.active, 2);
        assert!(summary.submitted >= 1);
        let live = f.store.get_live_strategy(second.id).await.unwrap();
        assert!(live.last_check.is_some(), "new deployment was checked");
    }
}
