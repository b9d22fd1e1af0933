//! OTLP/HTTP export, using the protobuf encoding of the OTLP protocol.
//!
//! Export requests are built from the generated OTLP message types and posted as `application/x-protobuf` to the
//! collector's `/v1/traces` and `/v1/metrics` endpoints.

use std::time::{Duration, SystemTime};

use opentelemetry_proto::tonic::{
    collector::{metrics::v1::ExportMetricsServiceRequest, trace::v1::ExportTraceServiceRequest},
    common::v1::{any_value, AnyValue, InstrumentationScope, KeyValue},
    metrics::v1::{
        metric, number_data_point, AggregationTemporality, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics, Sum,
    },
    resource::v1::Resource,
    trace::v1::{ResourceSpans, ScopeSpans, Span},
};
use prost::Message as _;
use snafu::ResultExt as _;
use tracing::trace;

use super::{EmitError, Http, Status};
use crate::{Endpoint, APP_NAME};

/// Path of the OTLP/HTTP traces endpoint.
pub const TRACES_PATH: &str = "/v1/traces";

/// Path of the OTLP/HTTP metrics endpoint.
pub const METRICS_PATH: &str = "/v1/metrics";

const CONTENT_TYPE_PROTOBUF: &str = "application/x-protobuf";

/// Creates a string-valued attribute.
pub fn string_attribute<K: Into<String>, V: Into<String>>(key: K, value: V) -> KeyValue {
    KeyValue {
        key: key.into(),
        value: Some(AnyValue {
            value: Some(any_value::Value::StringValue(value.into())),
        }),
    }
}

/// Creates a double-valued attribute.
pub fn double_attribute<K: Into<String>>(key: K, value: f64) -> KeyValue {
    KeyValue {
        key: key.into(),
        value: Some(AnyValue {
            value: Some(any_value::Value::DoubleValue(value)),
        }),
    }
}

fn service_resource() -> Resource {
    Resource {
        attributes: vec![string_attribute("service.name", APP_NAME)],
        ..Default::default()
    }
}

fn scope() -> InstrumentationScope {
    InstrumentationScope {
        name: APP_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        ..Default::default()
    }
}

/// Wraps a single span in a trace export request.
pub fn trace_request(span: Span) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: Some(service_resource()),
            scope_spans: vec![ScopeSpans {
                scope: Some(scope()),
                spans: vec![span],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Wraps a single data point of a monotonic, cumulative counter in a metrics export request.
pub fn counter_request<N, D>(name: N, description: D, data_point: NumberDataPoint) -> ExportMetricsServiceRequest
where
    N: Into<String>,
    D: Into<String>,
{
    let metric = Metric {
        name: name.into(),
        description: description.into(),
        data: Some(metric::Data::Sum(Sum {
            data_points: vec![data_point],
            aggregation_temporality: AggregationTemporality::Cumulative as i32,
            is_monotonic: true,
        })),
        ..Default::default()
    };

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(service_resource()),
            scope_metrics: vec![ScopeMetrics {
                scope: Some(scope()),
                metrics: vec![metric],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// Creates a floating-point data point covering `[start_time_unix_nano, now]`.
pub fn double_data_point(attributes: Vec<KeyValue>, start_time_unix_nano: u64, value: f64) -> NumberDataPoint {
    NumberDataPoint {
        attributes,
        start_time_unix_nano,
        time_unix_nano: now_unix_nanos(),
        value: Some(number_data_point::Value::AsDouble(value)),
        ..Default::default()
    }
}

/// OTLP/HTTP exporter.
///
/// Posts protobuf-encoded export requests to a collector. Any non-2xx response is treated as a failed export.
#[derive(Clone)]
pub struct OtlpHttpExporter {
    client: reqwest::Client,
    endpoint: Endpoint,
}

impl OtlpHttpExporter {
    /// Creates a new `OtlpHttpExporter` for the given collector endpoint.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP client cannot be built, an error is returned.
    pub fn new(endpoint: Endpoint, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self { client, endpoint })
    }

    /// Returns the collector endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Exports a trace request.
    ///
    /// # Errors
    ///
    /// If the request cannot be sent, or the collector responds with a non-success status, an error is returned.
    pub async fn export_traces(&self, request: &ExportTraceServiceRequest) -> Result<(), EmitError> {
        self.post(TRACES_PATH, request.encode_to_vec()).await
    }

    /// Exports a metrics request.
    ///
    /// # Errors
    ///
    /// If the request cannot be sent, or the collector responds with a non-success status, an error is returned.
    pub async fn export_metrics(&self, request: &ExportMetricsServiceRequest) -> Result<(), EmitError> {
        self.post(METRICS_PATH, request.encode_to_vec()).await
    }

    async fn post(&self, path: &str, body: Vec<u8>) -> Result<(), EmitError> {
        let url = self.endpoint.http_url(path);

        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, CONTENT_TYPE_PROTOBUF)
            .body(body)
            .send()
            .await
            .context(Http { url: url.clone() })?;

        let status = response.status();
        trace!(%url, %status, "OTLP export completed.");
        if !status.is_success() {
            return Status { url, status }.fail();
        }

        Ok(())
    }
}

/// Returns the current time as nanoseconds since the Unix epoch.
pub fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
