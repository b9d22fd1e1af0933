use std::time::Duration;

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    sinks::{EmitError, Sink, SinkKind},
    Endpoint,
};

/// The outcome of emitting to a single sink.
#[derive(Debug)]
pub struct CycleOutcome {
    /// Kind of the sink.
    pub kind: SinkKind,

    /// Endpoint of the sink.
    pub endpoint: Endpoint,

    /// Emit result.
    pub result: Result<(), EmitError>,
}

/// The outcome of a single emission cycle, in sink order.
#[derive(Debug, Default)]
pub struct CycleResult {
    outcomes: Vec<CycleOutcome>,
}

impl CycleResult {
    /// Returns the number of sinks that were driven during the cycle.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    /// Returns `true` if no sinks were driven during the cycle.
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Returns the number of sinks that emitted successfully.
    pub fn successes(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Returns the number of sinks that failed to emit.
    pub fn failures(&self) -> usize {
        self.len() - self.successes()
    }

    /// Returns an iterator over the per-sink outcomes, in the order the sinks were driven.
    pub fn iter(&self) -> impl Iterator<Item = &CycleOutcome> {
        self.outcomes.iter()
    }
}

/// Emission cycle scheduler.
///
/// Drives every configured sink exactly once per cycle, in a fixed order, and then sleeps for the configured interval
/// before starting the next cycle. A failing sink never prevents the remaining sinks in the cycle from being driven.
pub struct EmissionScheduler {
    sinks: Vec<Box<dyn Sink>>,
    interval: Duration,
}

impl EmissionScheduler {
    /// Creates a new `EmissionScheduler` that drives the given sinks, in order, every `interval`.
    pub fn new(sinks: Vec<Box<dyn Sink>>, interval: Duration) -> Self {
        Self { sinks, interval }
    }

    /// Runs a single emission cycle.
    ///
    /// Every sink is driven exactly once, regardless of whether prior sinks in the cycle failed. Failures are logged
    /// with the identity of the failing sink and collected into the returned result.
    pub async fn run_cycle(&mut self) -> CycleResult {
        let mut outcomes = Vec::with_capacity(self.sinks.len());

        for sink in self.sinks.iter_mut() {
            let kind = sink.kind();
            let endpoint = sink.endpoint().clone();
            let result = sink.emit().await;

            if let Err(e) = &result {
                warn!(sink = %kind, %endpoint, error = %e, "Failed to emit test {} sample.", kind);
            }

            outcomes.push(CycleOutcome { kind, endpoint, result });
        }

        let result = CycleResult { outcomes };
        debug!(
            successes = result.successes(),
            failures = result.failures(),
            "Emission cycle complete."
        );
        result
    }

    /// Runs emission cycles until `shutdown` is cancelled.
    ///
    /// The first cycle starts immediately. Cancellation is only observed between cycles: a cycle that has started always
    /// runs to completion.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            sinks = self.sinks.len(),
            interval = ?self.interval,
            "Emission scheduler started."
        );

        while !shutdown.is_cancelled() {
            let _ = self.run_cycle().await;

            select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.interval) => {},
            }
        }

        info!("Emission scheduler stopped.");
    }
}
