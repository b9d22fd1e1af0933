use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use snafu::{ensure, OptionExt as _, Snafu};

/// Endpoint parsing errors.
#[derive(Debug, Eq, PartialEq, Snafu)]
#[snafu(context(suffix(false)))]
pub enum EndpointParseError {
    /// The address had no port separator.
    #[snafu(display("endpoint '{}' is missing a port (expected 'host:port')", address))]
    MissingPort {
        /// The offending address.
        address: String,
    },

    /// The host portion was empty.
    #[snafu(display("endpoint '{}' has an empty host", address))]
    EmptyHost {
        /// The offending address.
        address: String,
    },

    /// The host was an IPv6 address that was not enclosed in brackets.
    #[snafu(display("endpoint '{}' has an IPv6 host that must be enclosed in brackets", address))]
    UnbracketedIpv6 {
        /// The offending address.
        address: String,
    },

    /// The port portion was not a valid, non-zero port number.
    #[snafu(display("endpoint '{}' has an invalid port", address))]
    InvalidPort {
        /// The offending address.
        address: String,
    },
}

/// A network endpoint, as a host and port pair.
///
/// Endpoints are parsed from, and rendered as, `host:port`. IPv6 hosts must be enclosed in brackets (`[::1]:4318`).
/// The host is not resolved when parsing: resolution happens each time a connection is attempted.
#[derive(Clone, Debug, Eq, Hash, PartialEq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates a new `Endpoint` from the given host and port.
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host portion of the endpoint.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port portion of the endpoint.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns an `http://` URL for the given path on this endpoint.
    ///
    /// `path` must start with a forward slash.
    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self, path)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = EndpointParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let address = s.trim();
        let (host, port) = address.rsplit_once(':').context(MissingPort { address })?;

        let host = match host.strip_prefix('[').and_then(|h| h.strip_suffix(']')) {
            Some(bracketed) => bracketed,
            None => {
                ensure!(!host.contains(':'), UnbracketedIpv6 { address });
                host
            }
        };
        ensure!(!host.is_empty(), EmptyHost { address });

        let port = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .context(InvalidPort { address })?;

        Ok(Self::new(host, port))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = EndpointParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_and_port() {
        let endpoint: Endpoint = "127.0.0.1:4318".parse().unwrap();
        assert_eq!(endpoint.host(), "127.0.0.1");
        assert_eq!(endpoint.port(), 4318);
        assert_eq!(endpoint.to_string(), "127.0.0.1:4318");
    }

    #[test]
    fn parse_bracketed_ipv6() {
        let endpoint: Endpoint = "[::1]:3100".parse().unwrap();
        assert_eq!(endpoint.host(), "::1");
        assert_eq!(endpoint.to_string(), "[::1]:3100");
        assert_eq!(endpoint.http_url("/loki/api/v1/push"), "http://[::1]:3100/loki/api/v1/push");
    }

    #[test]
    fn parse_rejects_bad_addresses() {
        assert!(matches!(
            "localhost".parse::<Endpoint>(),
            Err(EndpointParseError::MissingPort { .. })
        ));
        assert!(matches!(":8126".parse::<Endpoint>(), Err(EndpointParseError::EmptyHost { .. })));
        assert!(matches!(
            "localhost:0".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort { .. })
        ));
        assert!(matches!(
            "localhost:http".parse::<Endpoint>(),
            Err(EndpointParseError::InvalidPort { .. })
        ));
    }

    #[test]
    fn parse_rejects_unbracketed_ipv6() {
        for address in ["::1", "::1:4318", "fe80::1:8126"] {
            assert!(
                matches!(address.parse::<Endpoint>(), Err(EndpointParseError::UnbracketedIpv6 { .. })),
                "{} should be rejected",
                address
            );
        }
        assert!("[fe80::1]:8126".parse::<Endpoint>().is_ok());
    }
}
