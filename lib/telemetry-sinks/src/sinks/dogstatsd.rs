use std::io;

use async_trait::async_trait;
use rand::{rngs::StdRng, Rng as _};
use tracing::info;

use super::{sample_rng, statsd::LineSender, EmitError, Sink, SinkKind};
use crate::{Endpoint, APP_NAME};

const GAUGE_NAME: &str = "test.datadog.gauge";
const TAGS: &[&str] = &["environment:test"];

/// DogStatsD sink.
///
/// Sends one `test.datadog.gauge` gauge, namespaced with the application name and tagged with `environment:test`, with
/// a random value in `[0, 100)` per call to `emit`.
pub struct DogStatsDSink {
    sender: LineSender,
    metric_name: String,
    rng: StdRng,
}

impl DogStatsDSink {
    /// Creates a new `DogStatsDSink` sending to the given DogStatsD endpoint.
    ///
    /// # Errors
    ///
    /// If the endpoint cannot be resolved, or the UDP socket cannot be bound and connected, an error is returned.
    pub async fn new(endpoint: Endpoint, seed: Option<u64>) -> io::Result<Self> {
        Ok(Self {
            sender: LineSender::connect(endpoint).await?,
            metric_name: format!("{}.{}", APP_NAME, GAUGE_NAME),
            rng: sample_rng(seed, SinkKind::StatsGaugeB),
        })
    }
}

#[async_trait]
impl Sink for DogStatsDSink {
    fn kind(&self) -> SinkKind {
        SinkKind::StatsGaugeB
    }

    fn endpoint(&self) -> &Endpoint {
        self.sender.endpoint()
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let value = self.rng.random::<f64>() * 100.0;
        self.sender.send_gauge(&self.metric_name, value, 1.0, TAGS).await?;

        info!(receiver = %self.sender.endpoint(), "Test Datadog metric sent to receiver.");
        Ok(())
    }
}
