use anyhow::{anyhow, bail, Context as _};
use telemetry_sinks::{
    probe::is_ready,
    sinks::{DogStatsDSink, LokiSink, MetricSink, Sink, StatsDSink, SyslogSink, TraceSink},
    EmissionScheduler,
};
use tokio::{
    select,
    signal::unix::{signal, SignalKind},
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{DaemonConfiguration, LogSinkMode};

/// Spawns a background task that cancels `shutdown` when the process receives SIGINT or SIGTERM.
///
/// # Errors
///
/// If the signal handlers cannot be installed, an error is returned.
pub fn spawn_signal_handlers(shutdown: CancellationToken) -> Result<(), anyhow::Error> {
    let mut sigint_handler = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler.")?;
    let mut sigterm_handler = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler.")?;

    tokio::spawn(async move {
        select! {
            _ = sigint_handler.recv() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = sigterm_handler.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        shutdown.cancel();
    });

    Ok(())
}

/// Probes every required endpoint, failing if any of them does not accept a connection.
///
/// Targets whose sink is disabled are skipped.
async fn probe_required_endpoints(config: &DaemonConfiguration) -> Result<(), anyhow::Error> {
    for target in &config.probe.required {
        let endpoint = config.probe_endpoint(*target);
        if !config.is_target_enabled(*target) {
            warn!(receiver = %endpoint, "Skipping readiness probe of {:?} receiver, as its sink is disabled.", target);
            continue;
        }

        if !is_ready(endpoint, config.probe_timeout()).await {
            bail!(
                "Required {:?} receiver is not accepting connections at {}.",
                target,
                endpoint
            );
        }

        info!(receiver = %endpoint, "Receiver {:?} is ready.", target);
    }

    Ok(())
}

/// Builds the configured sinks, in the order they are driven each cycle.
async fn build_sinks(config: &DaemonConfiguration) -> Result<Vec<Box<dyn Sink>>, anyhow::Error> {
    let transport_timeout = config.transport_timeout();
    let mut sinks: Vec<Box<dyn Sink>> = Vec::new();

    let trace_sink = TraceSink::new(config.http_receiver.clone(), transport_timeout, config.seed)
        .context("Failed to create trace exporter.")?;
    sinks.push(Box::new(trace_sink));

    let metric_sink = MetricSink::new(config.http_receiver.clone(), transport_timeout, config.seed)
        .context("Failed to create metric exporter.")?;
    sinks.push(Box::new(metric_sink));

    match config.log_sink {
        LogSinkMode::Loki => {
            let loki_sink =
                LokiSink::new(config.loki_receiver.clone(), transport_timeout).context("Failed to create Loki client.")?;
            sinks.push(Box::new(loki_sink));
        }
        LogSinkMode::Syslog => {
            sinks.push(Box::new(SyslogSink::new(config.syslog_receiver.clone(), transport_timeout)));
        }
    }

    if config.statsd_enabled {
        let statsd_sink = StatsDSink::new(config.statsd_receiver.clone(), config.seed)
            .await
            .with_context(|| format!("Failed to create StatsD client for {}.", config.statsd_receiver))?;
        sinks.push(Box::new(statsd_sink));
    }

    if config.dogstatsd_enabled {
        let dogstatsd_sink = DogStatsDSink::new(config.datadog_receiver.clone(), config.seed)
            .await
            .with_context(|| format!("Failed to create DogStatsD client for {}.", config.datadog_receiver))?;
        sinks.push(Box::new(dogstatsd_sink));
    }

    Ok(sinks)
}

/// Runs the daemon until `shutdown` is cancelled.
///
/// Required endpoints are probed and the sinks are built first; cancellation during this phase returns immediately.
/// Once the scheduler is running, cancellation lets the in-flight cycle finish for up to the configured shutdown grace
/// period, after which the scheduler is aborted.
///
/// # Errors
///
/// If a required endpoint is not reachable, a sink cannot be created, or the scheduler stops unexpectedly, an error is
/// returned.
pub async fn run_daemon(config: DaemonConfiguration, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
    let startup = async {
        probe_required_endpoints(&config).await?;
        build_sinks(&config).await
    };

    let sinks = select! {
        biased;

        _ = shutdown.cancelled() => {
            info!("Shutdown requested during startup.");
            return Ok(());
        }
        result = startup => result?,
    };

    let scheduler = EmissionScheduler::new(sinks, config.interval());
    let mut scheduler_handle = tokio::spawn(scheduler.run(shutdown.clone()));

    select! {
        _ = shutdown.cancelled() => {},
        result = &mut scheduler_handle => {
            return match result {
                Ok(()) => Err(anyhow!("Emission scheduler stopped unexpectedly.")),
                Err(e) => Err(anyhow::Error::new(e).context("Emission scheduler task failed.")),
            };
        }
    }

    match timeout(config.shutdown_grace(), &mut scheduler_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "Emission scheduler task failed during shutdown."),
        Err(_) => {
            warn!(
                grace_period = ?config.shutdown_grace(),
                "In-flight emission cycle did not finish within the shutdown grace period. Abandoning it."
            );
            scheduler_handle.abort();
        }
    }

    Ok(())
}
