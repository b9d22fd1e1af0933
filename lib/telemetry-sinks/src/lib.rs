//! Synthetic telemetry sinks and the emission cycle that drives them.
//!
//! This crate provides the pieces needed to periodically push fabricated traces, metrics, logs, and statistics gauges
//! to a set of observability backends: a readiness prober for validating endpoints at startup, one sink per backend
//! protocol, and a scheduler that drives every sink once per cycle while isolating failures between them.
#![deny(warnings)]
#![deny(missing_docs)]

mod endpoint;
pub use self::endpoint::{Endpoint, EndpointParseError};

pub mod probe;

mod scheduler;
pub use self::scheduler::{CycleOutcome, CycleResult, EmissionScheduler};

pub mod sinks;

/// Application name used to identify emitted telemetry across every backend.
pub const APP_NAME: &str = "otel-test-daemon";
