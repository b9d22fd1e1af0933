use std::{path::PathBuf, time::Duration};

use anyhow::{bail, Context as _};
use clap::{ArgAction, Parser, ValueEnum};
use figment::{
    providers::{Env, Format as _, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use telemetry_sinks::Endpoint;
use tracing::level_filters::LevelFilter;

/// Prefix for environment variables that override configuration values.
///
/// Nested keys are separated with a double underscore, e.g. `OTEL_TEST_DAEMON_PROBE__TIMEOUT_MS`.
pub const ENV_PREFIX: &str = "OTEL_TEST_DAEMON_";

/// Which log backend receives the synthetic log record each cycle.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogSinkMode {
    /// Push to the Loki HTTP API.
    Loki,

    /// Write RFC 5424 syslog lines over TCP.
    Syslog,
}

/// A backend whose endpoint can be readiness-probed at startup.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ProbeTarget {
    /// OTLP/HTTP receiver.
    Http,

    /// Loki receiver.
    Loki,

    /// Syslog receiver.
    Syslog,

    /// StatsD receiver.
    Statsd,

    /// DogStatsD receiver.
    Datadog,
}

/// Readiness probe settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct ProbeConfiguration {
    /// How long to wait for a probe connection to be accepted, in milliseconds.
    pub timeout_ms: u64,

    /// Backends that must accept a TCP connection before the daemon starts emitting.
    pub required: Vec<ProbeTarget>,
}

impl Default for ProbeConfiguration {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            required: vec![ProbeTarget::Http, ProbeTarget::Datadog],
        }
    }
}

/// Daemon configuration.
///
/// Built once at startup and handed to everything that needs it. Sources are layered in order of increasing
/// precedence: built-in defaults, an optional YAML file, `OTEL_TEST_DAEMON_`-prefixed environment variables, and
/// finally command-line flags.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct DaemonConfiguration {
    /// OTLP/HTTP receiver, for traces and metrics.
    pub http_receiver: Endpoint,

    /// Loki receiver.
    pub loki_receiver: Endpoint,

    /// Syslog (TCP) receiver.
    pub syslog_receiver: Endpoint,

    /// StatsD receiver.
    pub statsd_receiver: Endpoint,

    /// DogStatsD receiver.
    pub datadog_receiver: Endpoint,

    /// Log backend to emit to.
    pub log_sink: LogSinkMode,

    /// Whether to emit plain StatsD gauges.
    pub statsd_enabled: bool,

    /// Whether to emit DogStatsD gauges.
    pub dogstatsd_enabled: bool,

    /// Time between emission cycles, in seconds.
    pub interval_secs: u64,

    /// Readiness probe settings.
    pub probe: ProbeConfiguration,

    /// Upper bound on connecting to, and completing a request against, a backend, in milliseconds.
    pub transport_timeout_ms: u64,

    /// How long to wait for an in-flight cycle to finish after a termination signal, in milliseconds.
    pub shutdown_grace_ms: u64,

    /// Seed for synthetic sample generation.
    ///
    /// When set, every run with the same seed emits the same sequence of sample values.
    pub seed: Option<u64>,
}

impl Default for DaemonConfiguration {
    fn default() -> Self {
        Self {
            http_receiver: Endpoint::new("127.0.0.1", 4318),
            loki_receiver: Endpoint::new("127.0.0.1", 3100),
            syslog_receiver: Endpoint::new("127.0.0.1", 5140),
            statsd_receiver: Endpoint::new("127.0.0.1", 9126),
            datadog_receiver: Endpoint::new("127.0.0.1", 8126),
            log_sink: LogSinkMode::Loki,
            statsd_enabled: true,
            dogstatsd_enabled: true,
            interval_secs: 5,
            probe: ProbeConfiguration::default(),
            transport_timeout_ms: 10_000,
            shutdown_grace_ms: 2_000,
            seed: None,
        }
    }
}

impl DaemonConfiguration {
    /// Returns the endpoint of the given probe target.
    pub fn probe_endpoint(&self, target: ProbeTarget) -> &Endpoint {
        match target {
            ProbeTarget::Http => &self.http_receiver,
            ProbeTarget::Loki => &self.loki_receiver,
            ProbeTarget::Syslog => &self.syslog_receiver,
            ProbeTarget::Statsd => &self.statsd_receiver,
            ProbeTarget::Datadog => &self.datadog_receiver,
        }
    }

    /// Returns `true` if the sink behind the given probe target is enabled.
    pub fn is_target_enabled(&self, target: ProbeTarget) -> bool {
        match target {
            ProbeTarget::Http => true,
            ProbeTarget::Loki => self.log_sink == LogSinkMode::Loki,
            ProbeTarget::Syslog => self.log_sink == LogSinkMode::Syslog,
            ProbeTarget::Statsd => self.statsd_enabled,
            ProbeTarget::Datadog => self.dogstatsd_enabled,
        }
    }

    /// Returns the time between emission cycles.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Returns the readiness probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe.timeout_ms)
    }

    /// Returns the transport timeout.
    pub fn transport_timeout(&self) -> Duration {
        Duration::from_millis(self.transport_timeout_ms)
    }

    /// Returns the shutdown grace period.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// If any setting is out of range, an error is returned.
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.interval_secs == 0 {
            bail!("Emission interval must be at least one second.");
        }

        if self.probe.timeout_ms == 0 {
            bail!("Readiness probe timeout must be non-zero.");
        }

        if self.transport_timeout_ms == 0 {
            bail!("Transport timeout must be non-zero.");
        }

        Ok(())
    }
}

#[derive(Parser)]
#[command(about)]
pub struct Cli {
    /// Enable verbose output. (Specify twice for more verbosity.)
    #[arg(short = 'v', long, action = ArgAction::Count, default_value_t = 0)]
    verbose: u8,

    /// Path to a YAML configuration file.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// OTLP/HTTP receiver endpoint, for traces and metrics.
    #[arg(long)]
    pub http_receiver: Option<Endpoint>,

    /// Loki receiver endpoint.
    #[arg(long)]
    pub loki_receiver: Option<Endpoint>,

    /// Syslog (TCP) receiver endpoint.
    #[arg(long)]
    pub syslog_receiver: Option<Endpoint>,

    /// StatsD receiver endpoint.
    #[arg(long)]
    pub statsd_receiver: Option<Endpoint>,

    /// DogStatsD receiver endpoint.
    #[arg(long)]
    pub datadog_receiver: Option<Endpoint>,

    /// Log backend to emit to.
    #[arg(long, value_enum)]
    pub log_sink: Option<LogSinkMode>,

    /// Time between emission cycles, in seconds.
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Readiness probe timeout, in milliseconds.
    #[arg(long)]
    pub probe_timeout_ms: Option<u64>,

    /// Backends that must be reachable at startup. (Comma-separated.)
    #[arg(long, value_enum, value_delimiter = ',')]
    pub probe_required: Option<Vec<ProbeTarget>>,

    /// Transport timeout, in milliseconds.
    #[arg(long)]
    pub transport_timeout_ms: Option<u64>,

    /// Shutdown grace period, in milliseconds.
    #[arg(long)]
    pub shutdown_grace_ms: Option<u64>,

    /// Seed for synthetic sample generation.
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Cli {
    /// Gets the configured log level based on the user-supplied verbosity level.
    pub fn log_level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Loads the daemon configuration, layering the configuration file, environment, and command-line flags over the
    /// built-in defaults.
    ///
    /// # Errors
    ///
    /// If the configuration file cannot be read, any source holds an invalid value, or the resulting configuration
    /// fails validation, an error is returned.
    pub fn load_configuration(&self) -> Result<DaemonConfiguration, anyhow::Error> {
        let mut figment = Figment::from(Serialized::defaults(DaemonConfiguration::default()));

        if let Some(path) = &self.config {
            if !path.is_file() {
                bail!("Configuration file '{}' does not exist.", path.display());
            }
            figment = figment.merge(Yaml::file(path));
        }

        let mut config: DaemonConfiguration = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to load configuration.")?;

        self.apply_overrides(&mut config);
        config.validate()?;

        Ok(config)
    }

    fn apply_overrides(&self, config: &mut DaemonConfiguration) {
        let endpoints = [
            (&self.http_receiver, &mut config.http_receiver),
            (&self.loki_receiver, &mut config.loki_receiver),
            (&self.syslog_receiver, &mut config.syslog_receiver),
            (&self.statsd_receiver, &mut config.statsd_receiver),
            (&self.datadog_receiver, &mut config.datadog_receiver),
        ];
        for (flag, value) in endpoints {
            if let Some(endpoint) = flag {
                *value = endpoint.clone();
            }
        }

        if let Some(log_sink) = self.log_sink {
            config.log_sink = log_sink;
        }
        if let Some(interval_secs) = self.interval_secs {
            config.interval_secs = interval_secs;
        }
        if let Some(timeout_ms) = self.probe_timeout_ms {
            config.probe.timeout_ms = timeout_ms;
        }
        if let Some(required) = &self.probe_required {
            config.probe.required = required.clone();
        }
        if let Some(transport_timeout_ms) = self.transport_timeout_ms {
            config.transport_timeout_ms = transport_timeout_ms;
        }
        if let Some(shutdown_grace_ms) = self.shutdown_grace_ms {
            config.shutdown_grace_ms = shutdown_grace_ms;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
    }
}

#[cfg(test)]
mod tests {
    use figment::Jail;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("otel-test-daemon").chain(args.iter().copied()))
    }

    #[test]
    fn defaults() {
        let config = DaemonConfiguration::default();
        assert_eq!(config.http_receiver.to_string(), "127.0.0.1:4318");
        assert_eq!(config.loki_receiver.to_string(), "127.0.0.1:3100");
        assert_eq!(config.statsd_receiver.to_string(), "127.0.0.1:9126");
        assert_eq!(config.datadog_receiver.to_string(), "127.0.0.1:8126");
        assert_eq!(config.interval(), Duration::from_secs(5));
        assert_eq!(config.probe_timeout(), Duration::from_secs(2));
        assert_eq!(config.probe.required, vec![ProbeTarget::Http, ProbeTarget::Datadog]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = parse(&[
            "--http-receiver",
            "collector:4318",
            "--log-sink",
            "syslog",
            "--probe-required",
            "http,syslog",
            "--interval-secs",
            "1",
            "--seed",
            "9",
        ]);
        let mut config = DaemonConfiguration::default();
        cli.apply_overrides(&mut config);

        assert_eq!(config.http_receiver, Endpoint::new("collector", 4318));
        assert_eq!(config.log_sink, LogSinkMode::Syslog);
        assert_eq!(config.probe.required, vec![ProbeTarget::Http, ProbeTarget::Syslog]);
        assert_eq!(config.interval_secs, 1);
        assert_eq!(config.seed, Some(9));
        assert_eq!(config.loki_receiver, DaemonConfiguration::default().loki_receiver);
    }

    #[test]
    fn invalid_endpoint_flag_is_rejected() {
        let result = Cli::try_parse_from(["otel-test-daemon", "--loki-receiver", "no-port"]);
        assert!(result.is_err());
    }

    #[test]
    fn yaml_file_is_layered_under_flags() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "otel-test-daemon.yaml",
                "loki_receiver: \"loki.internal:3100\"\ninterval_secs: 30\nprobe:\n  timeout_ms: 500\n  required: [loki]",
            )?;

            let cli = parse(&["--config", "otel-test-daemon.yaml", "--interval-secs", "10"]);
            let config = cli.load_configuration().unwrap();

            assert_eq!(config.loki_receiver, Endpoint::new("loki.internal", 3100));
            assert_eq!(config.interval_secs, 10);
            assert_eq!(config.probe.timeout_ms, 500);
            assert_eq!(config.probe.required, vec![ProbeTarget::Loki]);
            assert_eq!(config.http_receiver, DaemonConfiguration::default().http_receiver);
            Ok(())
        });
    }

    #[test]
    fn environment_is_layered_between_yaml_file_and_flags() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "otel-test-daemon.yaml",
                "loki_receiver: \"loki.internal:3100\"\ninterval_secs: 30\nprobe:\n  timeout_ms: 500",
            )?;
            jail.set_env("OTEL_TEST_DAEMON_LOKI_RECEIVER", "loki.env:3100");
            jail.set_env("OTEL_TEST_DAEMON_PROBE__TIMEOUT_MS", 750);
            jail.set_env("OTEL_TEST_DAEMON_INTERVAL_SECS", 20);

            let cli = parse(&["--config", "otel-test-daemon.yaml", "--interval-secs", "10"]);
            let config = cli.load_configuration().unwrap();

            assert_eq!(config.loki_receiver, Endpoint::new("loki.env", 3100));
            assert_eq!(config.probe.timeout_ms, 750);
            assert_eq!(config.interval_secs, 10);
            assert_eq!(config.probe.required, ProbeConfiguration::default().required);
            Ok(())
        });
    }

    #[test]
    fn invalid_environment_value_is_an_error() {
        Jail::expect_with(|jail| {
            jail.set_env("OTEL_TEST_DAEMON_HTTP_RECEIVER", "no-port");

            assert!(parse(&[]).load_configuration().is_err());
            Ok(())
        });
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = parse(&["--config", "/nonexistent/otel-test-daemon.yaml"]);
        assert!(cli.load_configuration().is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        let config = DaemonConfiguration {
            interval_secs: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
