use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_proto::tonic::metrics::v1::NumberDataPoint;
use rand::{rngs::StdRng, Rng as _};
use tracing::info;

use super::{
    otlp::{counter_request, double_data_point, now_unix_nanos, string_attribute, OtlpHttpExporter},
    sample_rng, EmitError, Sink, SinkKind,
};
use crate::Endpoint;

const COUNTER_NAME: &str = "test_counter";
const COUNTER_DESCRIPTION: &str = "A test counter metric";

/// Metric sink.
///
/// Records one random observation against a cumulative counter per call to `emit`, and exports the counter's current
/// total over OTLP/HTTP.
pub struct MetricSink {
    exporter: OtlpHttpExporter,
    rng: StdRng,
    start_time_unix_nano: u64,
    total: f64,
}

impl MetricSink {
    /// Creates a new `MetricSink` exporting to the given OTLP/HTTP collector endpoint.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new(endpoint: Endpoint, request_timeout: Duration, seed: Option<u64>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            exporter: OtlpHttpExporter::new(endpoint, request_timeout)?,
            rng: sample_rng(seed, SinkKind::Metric),
            start_time_unix_nano: now_unix_nanos(),
            total: 0.0,
        })
    }

    fn record(&mut self) -> NumberDataPoint {
        self.total += self.rng.random::<f64>();

        let attributes = vec![string_attribute("endpoint", self.exporter.endpoint().to_string())];
        double_data_point(attributes, self.start_time_unix_nano, self.total)
    }
}

#[async_trait]
impl Sink for MetricSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Metric
    }

    fn endpoint(&self) -> &Endpoint {
        self.exporter.endpoint()
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let data_point = self.record();
        let request = counter_request(COUNTER_NAME, COUNTER_DESCRIPTION, data_point);
        self.exporter.export_metrics(&request).await?;

        info!(receiver = %self.exporter.endpoint(), "Test metric sent to HTTP receiver.");
        Ok(())
    }
}
