//! Demo control-plane service: wires a paper broker, in-memory store, and
//! synthetic market data into a running scheduler. Stops cleanly on ctrl-c.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tw_data::{synthetic, MemoryDataSource, MemoryStateStore, StateStore};
use tw_live::{
    BrokerRouter, CheckDeps, ControlPlane, ControlPlaneDeps, ExecutorDeps, OwnerRateLimiter,
    PaperBroker, PeakTracker, QuickDeployRequest, RateLimiterConfig, SignalExecutor,
    StrategyScheduler,
};
use tw_optimizer::{Optimizer, OptimizerDeps};
use tw_types::{
    Clock, CoreConfig, NoopSink, Parameters, Strategy, StrategyType, SystemClock, Timeframe,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = CoreConfig::default();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(MemoryStateStore::new());
    let notifier = Arc::new(NoopSink);
    let peaks = Arc::new(PeakTracker::new());

    // Synthetic daily history for a couple of symbols.
    let data = Arc::new(MemoryDataSource::new());
    let start = Utc::now() - Duration::days(400);
    for (symbol, price) in [("AAPL", 180.0), ("MSFT", 410.0)] {
        data.insert(
            symbol,
            Timeframe::OneDay,
            synthetic::random_walk(symbol, start, 400, price, 7),
        );
    }

    // Paper broker seeded with the latest synthetic closes.
    let brokers = Arc::new(BrokerRouter::new());
    let paper = Arc::new(PaperBroker::with_defaults());
    paper.set_price("AAPL", Decimal::from(180));
    paper.set_price("MSFT", Decimal::from(410));
    brokers.register("demo", paper);

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
            peaks: peaks.clone(),
        },
        config.executor.retry.clone(),
        config.risk.clone(),
    ));

    let optimizer = Arc::new(Optimizer::new(
        OptimizerDeps {
            data: data.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        },
        config.optimizer.worker_pool_size,
    ));

    let control = ControlPlane::new(
        ControlPlaneDeps {
            store: store.clone(),
            brokers: brokers.clone(),
            clock: clock.clone(),
            peaks,
            optimizer,
        },
        config.clone(),
    );

    // Seed one strategy and activate it through the quick-deploy path.
    let strategy = Strategy::new("demo", "RSI dip buyer", StrategyType::Rsi)
        .with_parameters(Parameters::new().with("period", 14));
    store.insert_strategy(strategy.clone()).await?;
    let live = control
        .quick_deploy(QuickDeployRequest::new(
            strategy.id,
            vec!["AAPL".into(), "MSFT".into()],
        ))
        .await?;
    info!(live_id = %live.id, "demo strategy deployed");

    let scheduler = Arc::new(StrategyScheduler::new(
        CheckDeps {
            store,
            data,
            brokers,
            executor,
            notifier,
            clock,
            timeframe: Timeframe::OneDay,
        },
        config.scheduler,
    ));

    let runner = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.run().await })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    scheduler.shutdown().await;
    runner.abort();

    Ok(())
}
