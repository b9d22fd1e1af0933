//! Telemetry sinks.
//!
//! A sink wraps the client state for a single backend and emits one synthetic sample to it per call to
//! [`Sink::emit`]. Failures are returned as [`EmitError`] values so that a failing backend never prevents the other
//! sinks in a cycle from being driven.

use std::fmt;

use async_trait::async_trait;
use rand::{rngs::StdRng, SeedableRng as _};
use snafu::Snafu;

use crate::Endpoint;

mod dogstatsd;
pub use self::dogstatsd::DogStatsDSink;

mod loki;
pub use self::loki::{LokiPushPayload, LokiSink, LokiStream};

mod metric;
pub use self::metric::MetricSink;

pub mod otlp;

mod statsd;
pub use self::statsd::StatsDSink;

mod syslog;
pub use self::syslog::{format_syslog_line, SyslogSink};

mod trace;
pub use self::trace::TraceSink;

/// Sink kind.
///
/// Identifies which backend protocol a sink speaks.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SinkKind {
    /// OTLP traces.
    Trace,

    /// OTLP metrics.
    Metric,

    /// Loki push API.
    LogPush,

    /// Syslog lines over TCP.
    LogLine,

    /// Plain StatsD gauges.
    StatsGaugeA,

    /// DogStatsD gauges.
    StatsGaugeB,
}

impl SinkKind {
    /// Returns a human-readable name for the sink kind.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Metric => "metric",
            Self::LogPush => "loki",
            Self::LogLine => "syslog",
            Self::StatsGaugeA => "statsd",
            Self::StatsGaugeB => "dogstatsd",
        }
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emit errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)), visibility(pub(crate)))]
pub enum EmitError {
    /// Failed to connect to the backend.
    #[snafu(display("failed to connect to {}: {}", endpoint, source))]
    Connect {
        /// Backend endpoint.
        endpoint: Endpoint,

        /// Error source.
        source: std::io::Error,
    },

    /// Connecting to the backend did not complete in time.
    #[snafu(display("timed out connecting to {}", endpoint))]
    ConnectTimeout {
        /// Backend endpoint.
        endpoint: Endpoint,
    },

    /// Failed to write to, or send a datagram to, the backend.
    #[snafu(display("failed to write to {}: {}", endpoint, source))]
    Write {
        /// Backend endpoint.
        endpoint: Endpoint,

        /// Error source.
        source: std::io::Error,
    },

    /// The HTTP request could not be completed.
    #[snafu(display("HTTP request to {} failed: {}", url, source))]
    Http {
        /// Request URL.
        url: String,

        /// Error source.
        source: reqwest::Error,
    },

    /// The backend answered an HTTP request with a non-success status.
    #[snafu(display("HTTP request to {} returned unexpected status {}", url, status))]
    Status {
        /// Request URL.
        url: String,

        /// Response status.
        status: reqwest::StatusCode,
    },

    /// The payload could not be encoded.
    #[snafu(display("failed to encode payload: {}", source))]
    Encode {
        /// Error source.
        source: serde_json::Error,
    },
}

/// A telemetry sink.
///
/// Implementations own whatever client, socket, or buffer state their backend requires, and release it when dropped.
#[async_trait]
pub trait Sink: Send {
    /// Returns the kind of this sink.
    fn kind(&self) -> SinkKind;

    /// Returns the endpoint this sink emits to.
    fn endpoint(&self) -> &Endpoint;

    /// Emits a single synthetic sample to the backend.
    ///
    /// # Errors
    ///
    /// If the sample could not be delivered, an error is returned. Errors apply to this attempt only: the sink remains
    /// usable for subsequent calls.
    async fn emit(&mut self) -> Result<(), EmitError>;
}

/// Creates the random number generator used by a sink to produce samples.
///
/// When `seed` is given, the generator is derived deterministically from it, mixed with the sink kind so that each sink
/// produces its own sequence. Otherwise, the generator is seeded from the operating system.
pub fn sample_rng(seed: Option<u64>, kind: SinkKind) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ (kind as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)),
        None => StdRng::from_os_rng(),
    }
}
