//! ingestor: upstream event-stream client feeding the partitioned log.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use wikipulse_core::ingest::StreamClient;
use wikipulse_core::log::{EditProducer, KafkaSink, ProducerTuning};
use wikipulse_server::bootstrap::{self, CommonArgs, EXIT_CONFIG, EXIT_OK, EXIT_RUNTIME};

#[derive(Parser, Debug)]
#[command(name = "ingestor")]
#[command(about = "WikiPulse upstream stream ingestor")]
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

    let sink = match KafkaSink::connect(&config.kafka) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            error!("failed to create log producer: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let (producer, drain_worker) = EditProducer::start(sink.clone(), ProducerTuning::default());
    let producer = Arc::new(producer);

    let client = match StreamClient::new(config.ingest.clone(), producer.clone()) {
        Ok(client) => client,
        Err(e) => {
            error!("failed to build stream client: {e}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            bootstrap::shutdown_signal().await;
            cancel.cancel();
        });
    }

    // Runs until cancelled; connection loss only ever reconnects.
    client.run(cancel).await;

    // Shutdown order: the stream is stopped, now drain the ring and
    // flush the log client.
    info!(
        "ingestor stopping: {} accepted, {} dropped on backpressure",
        client
            .counters
            .accepted
            .load(std::sync::atomic::Ordering::Relaxed),
        client
            .counters
            .dropped_backpressure
            .load(std::sync::atomic::Ordering::Relaxed),
    );
    drop(client);

    match Arc::try_unwrap(producer) {
        Ok(producer) => producer.shutdown(),
        Err(_) => {
            error!("producer still shared at shutdown");
            return ExitCode::from(EXIT_RUNTIME);
        }
    }
    if drain_worker.await.is_err() {
        error!("drain worker panicked");
        return ExitCode::from(EXIT_RUNTIME);
    }
    if let Err(e) = sink.flush() {
        error!("final flush failed: {e}");
        return ExitCode::from(EXIT_RUNTIME);
    }

    info!("ingestor shut down cleanly");
    ExitCode::from(EXIT_OK)
}
