use std::{
    fmt::{Display, Write as _},
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use bytes::{BufMut as _, BytesMut};
use rand::{rngs::StdRng, Rng as _};
use snafu::ResultExt as _;
use tokio::net::{lookup_host, UdpSocket};
use tracing::info;

use super::{sample_rng, EmitError, Sink, SinkKind, Write};
use crate::{Endpoint, APP_NAME};

const GAUGE_NAME: &str = "test_gauge";

/// A connected UDP socket that sends one StatsD line per datagram.
///
/// The line buffer is reused across sends.
pub(super) struct LineSender {
    endpoint: Endpoint,
    socket: UdpSocket,
    buf: BytesMut,
}

impl LineSender {
    pub(super) async fn connect(endpoint: Endpoint) -> io::Result<Self> {
        let target = lookup_host((endpoint.host(), endpoint.port()))
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("no addresses found for {}", endpoint)))?;

        // We have to bind the socket first before we can "connect" it.
        let bind_addr: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await?;

        Ok(Self {
            endpoint,
            socket,
            buf: BytesMut::with_capacity(256),
        })
    }

    pub(super) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Sends a gauge line built from the given parts.
    ///
    /// The sample rate is only written when below 1.0, and tags are only written when present.
    pub(super) async fn send_gauge<V: Display>(
        &mut self, name: &str, value: V, sample_rate: f64, tags: &[&str],
    ) -> Result<(), EmitError> {
        self.buf.clear();
        write_gauge(&mut self.buf, name, value, sample_rate, tags);

        self.socket.send(&self.buf).await.context(Write {
            endpoint: self.endpoint.clone(),
        })?;
        Ok(())
    }
}

/// Writes a StatsD gauge line into `buf`.
pub(super) fn write_gauge<V: Display>(buf: &mut BytesMut, name: &str, value: V, sample_rate: f64, tags: &[&str]) {
    // Writing into a `BytesMut` grows the buffer as needed and cannot fail.
    let _ = write!(buf, "{}:{}|g", name, value);
    if sample_rate < 1.0 {
        let _ = write!(buf, "|@{}", sample_rate);
    }

    for (i, tag) in tags.iter().enumerate() {
        let separator: &[u8] = if i == 0 { b"|#" } else { b"," };
        buf.put_slice(separator);
        buf.put_slice(tag.as_bytes());
    }
}

/// StatsD sink.
///
/// Sends one `test_gauge` gauge, prefixed with the application name, with a random integer value in `[0, 100)` per
/// call to `emit`.
pub struct StatsDSink {
    sender: LineSender,
    metric_name: String,
    rng: StdRng,
}

impl StatsDSink {
    /// Creates a new `StatsDSink` sending to the given StatsD endpoint.
    ///
    /// # Errors
    ///
    /// If the endpoint cannot be resolved, or the UDP socket cannot be bound and connected, an error is returned.
    pub async fn new(endpoint: Endpoint, seed: Option<u64>) -> io::Result<Self> {
        Ok(Self {
            sender: LineSender::connect(endpoint).await?,
            metric_name: format!("{}.{}", APP_NAME, GAUGE_NAME),
            rng: sample_rng(seed, SinkKind::StatsGaugeA),
        })
    }
}

#[async_trait]
impl Sink for StatsDSink {
    fn kind(&self) -> SinkKind {
        SinkKind::StatsGaugeA
    }

    fn endpoint(&self) -> &Endpoint {
        self.sender.endpoint()
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let value = self.rng.random_range(0..100i64);
        self.sender.send_gauge(&self.metric_name, value, 1.0, &[]).await?;

        info!(receiver = %self.sender.endpoint(), "Test StatsD metric sent to receiver.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gauge<V: Display>(name: &str, value: V, sample_rate: f64, tags: &[&str]) -> String {
        let mut buf = BytesMut::new();
        write_gauge(&mut buf, name, value, sample_rate, tags);
        String::from_utf8(buf.to_vec()).unwrap()
    }

    #[test]
    fn gauge_line_format() {
        assert_eq!(gauge("app.test_gauge", 42, 1.0, &[]), "app.test_gauge:42|g");
        assert_eq!(gauge("app.test_gauge", 42, 0.5, &[]), "app.test_gauge:42|g|@0.5");
        assert_eq!(
            gauge("app.gauge", 1.25, 1.0, &["environment:test", "team:obs"]),
            "app.gauge:1.25|g|#environment:test,team:obs"
        );
    }

    #[tokio::test]
    async fn emit_sends_prefixed_gauge() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new("127.0.0.1", receiver.local_addr().unwrap().port());

        let mut sink = StatsDSink::new(endpoint, Some(11)).await.unwrap();
        sink.emit().await.unwrap();

        let mut buf = [0u8; 512];
        let n = receiver.recv(&mut buf).await.unwrap();
        let line = std::str::from_utf8(&buf[..n]).unwrap();

        let (name, rest) = line.split_once(':').unwrap();
        assert_eq!(name, "otel-test-daemon.test_gauge");
        let value = rest.strip_suffix("|g").unwrap().parse::<i64>().unwrap();
        assert!((0..100).contains(&value));
    }
}
