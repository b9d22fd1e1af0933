//! Readiness probing.

use std::time::Duration;

use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, trace};

use crate::Endpoint;

/// Checks whether the given endpoint accepts TCP connections.
///
/// Returns `true` if a TCP handshake with the endpoint completes within `probe_timeout`, and `false` if the connection
/// is refused, fails for any other reason, or does not complete in time. The probe connection is closed immediately.
pub async fn is_ready(endpoint: &Endpoint, probe_timeout: Duration) -> bool {
    let address = (endpoint.host(), endpoint.port());
    match timeout(probe_timeout, TcpStream::connect(address)).await {
        Ok(Ok(stream)) => {
            trace!(%endpoint, "Readiness probe connected.");
            drop(stream);
            true
        }
        Ok(Err(e)) => {
            debug!(%endpoint, error = %e, "Readiness probe failed to connect.");
            false
        }
        Err(_) => {
            debug!(%endpoint, timeout = ?probe_timeout, "Readiness probe timed out.");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{net::SocketAddr, time::Instant};

    use socket2::{Domain, Protocol, Socket, Type};
    use tokio::net::TcpListener;

    use super::*;

    async fn unused_local_endpoint() -> Endpoint {
        // Bind to an ephemeral port and release it immediately, leaving nothing listening there.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        Endpoint::new("127.0.0.1", port)
    }

    #[tokio::test]
    async fn ready_when_listening() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = Endpoint::new("127.0.0.1", listener.local_addr().unwrap().port());

        assert!(is_ready(&endpoint, Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn not_ready_when_nothing_listening() {
        let endpoint = unused_local_endpoint().await;

        let started = Instant::now();
        assert!(!is_ready(&endpoint, Duration::from_secs(2)).await);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    /// Binds a listener with a zero-length backlog and fills its accept queue, so that further handshakes stall
    /// instead of being refused.
    ///
    /// Returns the listener and the queued connections, both of which must be kept alive.
    async fn saturated_listener() -> (Socket, Vec<TcpStream>, Endpoint) {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        socket.bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into()).unwrap();
        socket.listen(0).unwrap();
        let address = socket.local_addr().unwrap().as_socket().unwrap();

        let mut queued = Vec::new();
        for _ in 0..16 {
            match timeout(Duration::from_millis(200), TcpStream::connect(address)).await {
                Ok(Ok(stream)) => queued.push(stream),
                _ => break,
            }
        }

        (socket, queued, Endpoint::new("127.0.0.1", address.port()))
    }

    #[tokio::test]
    async fn not_ready_when_handshake_stalls() {
        let (_socket, _queued, endpoint) = saturated_listener().await;
        let probe_timeout = Duration::from_millis(500);

        let started = Instant::now();
        assert!(!is_ready(&endpoint, probe_timeout).await);

        let elapsed = started.elapsed();
        assert!(elapsed >= probe_timeout);
        assert!(elapsed < probe_timeout + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn not_ready_when_host_unresolvable() {
        let endpoint = Endpoint::new("nonexistent.invalid", 4318);

        assert!(!is_ready(&endpoint, Duration::from_secs(2)).await);
    }
}
