//! A synthetic telemetry generator that periodically emits traces, metrics, logs, and StatsD gauges to a fixed set of
//! observability backends, for verifying that a telemetry pipeline is reachable and ingesting end-to-end.

#![deny(warnings)]
#![deny(missing_docs)]

use clap::Parser as _;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
use self::config::Cli;

mod lifecycle;
use self::lifecycle::{run_daemon, spawn_signal_handlers};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .compact()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(cli.log_level().into())
                .from_env_lossy(),
        )
        .with_ansi(true)
        .with_target(true)
        .init();

    match run(cli).await {
        Ok(()) => info!("otel-test-daemon stopped."),
        Err(e) => {
            error!("{:?}", e);
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), anyhow::Error> {
    info!("otel-test-daemon starting...");

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone())?;

    let config = cli.load_configuration()?;
    info!(
        http_receiver = %config.http_receiver,
        log_sink = ?config.log_sink,
        interval = ?config.interval(),
        "Loaded configuration."
    );

    run_daemon(config, shutdown).await
}
