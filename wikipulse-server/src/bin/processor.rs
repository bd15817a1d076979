//! processor: the detector consumers and background sweeps.
//!
//! Runs one consumer-group member per detector (hot tracker, spike,
//! edit war, trending), the eviction sweep, the trending pruner and the
//! resource monitor, all over the shared store.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wikipulse_core::detect::{EditWarDetector, SpikeDetector};
use wikipulse_core::hot::HotPageTracker;
use wikipulse_core::log::EditConsumer;
use wikipulse_core::monitor::{FeatureFlags, ResourceMonitor};
use wikipulse_core::pipeline::{DetectorRuntime, EditHandler};
use wikipulse_core::store::{RedisStore, Store};
use wikipulse_core::trending::TrendingScorer;
use wikipulse_server::bootstrap::{self, CommonArgs, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME};

#[derive(Parser, Debug)]
#[command(name = "processor")]
#[command(about = "WikiPulse detector processor")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    bootstrap::init_tracing(args.common.verbose);

    let config = match bootstrap::load_config(&args.common) {
        Ok(config) => config,
        Err(code) => return code,
    };

    let store: Arc<dyn Store> = match RedisStore::connect(&config.redis.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to connect to the shared store: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let flags = FeatureFlags::new();

    // One consumer-group member per detector.
    let consumers = ["hot", "spike", "war", "trending"]
        .into_iter()
        .map(|name| EditConsumer::connect(&config.kafka, name))
        .collect::<Result<Vec<_>, _>>();
    let mut consumers = match consumers {
        Ok(consumers) => consumers,
        Err(e) => {
            error!("failed to join consumer groups: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    let trending_consumer = consumers.pop().expect("four consumers");
    let war_consumer = consumers.pop().expect("four consumers");
    let spike_consumer = consumers.pop().expect("four consumers");
    let hot_consumer = consumers.pop().expect("four consumers");

    let tracker = Arc::new(HotPageTracker::new(store.clone(), config.hot_pages.clone()));
    let spike = Arc::new(SpikeDetector::new(
        store.clone(),
        config.spike.clone(),
        config.alerts.clone(),
    ));
    let war = Arc::new(EditWarDetector::new(
        store.clone(),
        config.edit_war.clone(),
        config.hot_pages.clone(),
        config.alerts.clone(),
    ));
    let trending = Arc::new(TrendingScorer::new(store.clone(), config.trending.clone()));

    // The war detector's lag drives the overload breaker: it is the
    // most expensive consumer.
    let monitor = Arc::new(ResourceMonitor::new(
        flags.clone(),
        ResourceMonitor::standard_watches(
            store.clone(),
            war_consumer.lag_gauge(),
            &config.monitor,
        ),
        config.monitor.clone(),
    ));

    let detectors_cancel = CancellationToken::new();
    let background_cancel = CancellationToken::new();

    let mut detector_tasks = Vec::new();
    let runtimes: Vec<(EditConsumer, Arc<dyn EditHandler>)> = vec![
        (hot_consumer, tracker.clone()),
        (spike_consumer, spike),
        (war_consumer, war),
        (trending_consumer, trending.clone()),
    ];
    for (consumer, handler) in runtimes {
        let runtime = DetectorRuntime::new(consumer, handler, flags.clone());
        let cancel = detectors_cancel.clone();
        detector_tasks.push(tokio::spawn(async move { runtime.run(cancel).await }));
    }

    let eviction_task = {
        let tracker = tracker.clone();
        let cancel = background_cancel.clone();
        tokio::spawn(async move { tracker.run_eviction(cancel).await })
    };
    let pruner_task = {
        let trending = trending.clone();
        let cancel = background_cancel.clone();
        tokio::spawn(async move { trending.run_pruner(cancel).await })
    };
    let monitor_task = {
        let monitor = monitor.clone();
        let cancel = background_cancel.clone();
        tokio::spawn(async move { monitor.run(cancel).await })
    };

    info!("processor running");
    bootstrap::shutdown_signal().await;

    // Reverse dependency order: finish in-flight detector work first,
    // then stop the sweeps and the monitor.
    detectors_cancel.cancel();
    let mut clean = true;
    for task in detector_tasks {
        if task.await.is_err() {
            clean = false;
        }
    }

    background_cancel.cancel();
    for task in [eviction_task, pruner_task, monitor_task] {
        if task.await.is_err() {
            clean = false;
        }
    }

    if clean {
        info!("processor shut down cleanly");
        ExitCode::from(EXIT_OK)
    } else {
        error!("one or more tasks panicked during shutdown");
        ExitCode::from(EXIT_RUNTIME)
    }
}
