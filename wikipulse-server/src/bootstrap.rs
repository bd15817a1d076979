//! Shared process bootstrap: CLI arguments, tracing setup, config
//! loading and shutdown signalling for all three binaries.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use wikipulse_config::Config;

/// Clean shutdown.
pub const EXIT_OK: u8 = 0;

/// Configuration or startup failure.
pub const EXIT_CONFIG: u8 = 1;

/// Unrecoverable runtime error.
pub const EXIT_RUNTIME: u8 = 2;

/// Flags common to ingestor, processor and api-host.
#[derive(Parser, Debug)]
pub struct CommonArgs {
    /// Path to the TOML configuration file.
    #[arg(long, env = "WIKIPULSE_CONFIG", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Enable debug-level logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Install the tracing subscriber. `RUST_LOG` wins when set.
pub fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load and validate the config, logging warnings. Returns the exit
/// code for `main` on failure.
pub fn load_config(args: &CommonArgs) -> Result<Config, ExitCode> {
    match Config::load(args.config.as_deref()) {
        Ok(load) => {
            load.log_warnings();
            Ok(load.config)
        }
        Err(e) => {
            error!("configuration error: {e}");
            Err(ExitCode::from(EXIT_CONFIG))
        }
    }
}

/// Resolve when the process is asked to stop (SIGINT or SIGTERM).
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
