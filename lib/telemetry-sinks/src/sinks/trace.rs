use std::time::Duration;

use async_trait::async_trait;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, Span};
use rand::{rngs::StdRng, Rng as _};
use tracing::info;

use super::{
    otlp::{double_attribute, now_unix_nanos, string_attribute, trace_request, OtlpHttpExporter},
    sample_rng, EmitError, Sink, SinkKind,
};
use crate::Endpoint;

const SPAN_NAME: &str = "TestSpan";

/// Trace sink.
///
/// Emits a single, immediately-ended span per call to `emit`, exported over OTLP/HTTP.
pub struct TraceSink {
    exporter: OtlpHttpExporter,
    rng: StdRng,
}

impl TraceSink {
    /// Creates a new `TraceSink` exporting to the given OTLP/HTTP collector endpoint.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new(endpoint: Endpoint, request_timeout: Duration, seed: Option<u64>) -> Result<Self, reqwest::Error> {
        Ok(Self {
            exporter: OtlpHttpExporter::new(endpoint, request_timeout)?,
            rng: sample_rng(seed, SinkKind::Trace),
        })
    }

    fn build_span(&mut self) -> Span {
        // All-zero identifiers are invalid.
        let trace_id = self.rng.random::<u128>().max(1);
        let span_id = self.rng.random::<u64>().max(1);

        let start_time_unix_nano = now_unix_nanos();
        let attributes = vec![
            string_attribute("receiver", self.exporter.endpoint().to_string()),
            double_attribute("test.value", self.rng.random::<f64>()),
        ];

        Span {
            trace_id: trace_id.to_be_bytes().to_vec(),
            span_id: span_id.to_be_bytes().to_vec(),
            name: SPAN_NAME.to_string(),
            kind: SpanKind::Internal as i32,
            start_time_unix_nano,
            end_time_unix_nano: now_unix_nanos().max(start_time_unix_nano),
            attributes,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Sink for TraceSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Trace
    }

    fn endpoint(&self) -> &Endpoint {
        self.exporter.endpoint()
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let request = trace_request(self.build_span());
        self.exporter.export_traces(&request).await?;

        info!(receiver = %self.exporter.endpoint(), "Test trace sent to HTTP receiver.");
        Ok(())
    }
}
