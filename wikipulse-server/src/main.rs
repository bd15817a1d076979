//! api-host: the live fan-out surface.
//!
//! Serves the WebSocket feed/alert streams, the trending leaderboard
//! and the alert/stat read APIs over the shared store.

use clap::Parser;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wikipulse_core::store::{RedisStore, Store};
use wikipulse_core::trending::TrendingScorer;
use wikipulse_server::bootstrap::{self, CommonArgs, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME};
use wikipulse_server::routes;
use wikipulse_server::state::AppState;
use wikipulse_server::websocket::FanoutHub;

#[derive(Parser, Debug)]
#[command(name = "api-host")]
#[command(about = "WikiPulse live fan-out API host")]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    bootstrap::init_tracing(args.common.verbose);

    let config = match bootstrap::load_config(&args.common) {
        Ok(config) => Arc::new(config),
        Err(code) => return code,
    };

    let store: Arc<dyn Store> = match RedisStore::connect(&config.redis.url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!("failed to connect to the shared store: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let hub = Arc::new(FanoutHub::new(config.fanout.clone()));
    let trending = Arc::new(TrendingScorer::new(store.clone(), config.trending.clone()));

    let state = AppState {
        store: store.clone(),
        hub: hub.clone(),
        trending,
        config: config.clone(),
        started_at: chrono::Utc::now(),
    };

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {addr}: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    info!("api-host listening on {addr}");

    // The hub holds this process's single subscription to each pub/sub
    // channel.
    let hub_cancel = CancellationToken::new();
    let hub_task = {
        let hub = hub.clone();
        let cancel = hub_cancel.clone();
        tokio::spawn(async move { hub.run(store, cancel).await })
    };

    let app = routes::router(state);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(bootstrap::shutdown_signal())
    .await;

    // Server is down; close the hub and its subscriptions.
    hub_cancel.cancel();
    let _ = hub_task.await;

    match served {
        Ok(()) => {
            info!("api-host shut down cleanly");
            ExitCode::from(EXIT_OK)
        }
        Err(e) => {
            error!("server error: {e}");
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}
