use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use snafu::ResultExt as _;
use tracing::info;

use super::{otlp::now_unix_nanos, EmitError, Encode, Http, Sink, SinkKind, Status};
use crate::{Endpoint, APP_NAME};

const PUSH_PATH: &str = "/loki/api/v1/push";
const LOG_LEVEL: &str = "info";
const MESSAGE: &str = "Test Loki message";

/// A single Loki stream: a set of labels and the log entries pushed under them.
///
/// Each value is a `[timestamp, line]` pair, where the timestamp is the number of nanoseconds since the Unix epoch,
/// encoded as a decimal string.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LokiStream {
    /// Stream labels.
    pub stream: BTreeMap<String, String>,

    /// Log entries.
    pub values: Vec<(String, String)>,
}

/// Loki push API request body.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct LokiPushPayload {
    /// Streams to push.
    pub streams: Vec<LokiStream>,
}

impl LokiPushPayload {
    /// Creates a payload with a single stream, labeled with the application name and `info` level, holding a single
    /// entry.
    pub fn single_entry<M: Into<String>>(timestamp_unix_nanos: u64, message: M) -> Self {
        let stream = BTreeMap::from([
            ("app".to_string(), APP_NAME.to_string()),
            ("log_level".to_string(), LOG_LEVEL.to_string()),
        ]);

        Self {
            streams: vec![LokiStream {
                stream,
                values: vec![(timestamp_unix_nanos.to_string(), message.into())],
            }],
        }
    }
}

/// Loki sink.
///
/// Pushes a single log entry to the Loki push API per call to `emit`.
pub struct LokiSink {
    client: reqwest::Client,
    endpoint: Endpoint,
    url: String,
}

impl LokiSink {
    /// Creates a new `LokiSink` pushing to the given Loki endpoint.
    ///
    /// # Errors
    ///
    /// If the HTTP client cannot be built, an error is returned.
    pub fn new(endpoint: Endpoint, request_timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .build()?;
        let url = endpoint.http_url(PUSH_PATH);

        Ok(Self { client, endpoint, url })
    }
}

#[async_trait]
impl Sink for LokiSink {
    fn kind(&self) -> SinkKind {
        SinkKind::LogPush
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let payload = LokiPushPayload::single_entry(now_unix_nanos(), MESSAGE);
        let body = serde_json::to_vec(&payload).context(Encode)?;

        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .context(Http { url: self.url.clone() })?;

        // Loki answers a successful push with `204 No Content`; anything outside of 2xx means the entry was dropped.
        let status = response.status();
        if !status.is_success() {
            return Status {
                url: self.url.clone(),
                status,
            }
            .fail();
        }

        info!(receiver = %self.endpoint, %status, "Test Loki message sent to receiver.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::{extract::State, http::StatusCode, routing::post, Router};
    use tokio::net::TcpListener;

    use super::*;

    type Captured = Arc<Mutex<Vec<String>>>;

    async fn spawn_loki(status: StatusCode) -> (Endpoint, Captured) {
        let captured = Captured::default();
        let app = Router::new()
            .route(
                PUSH_PATH,
                post(move |State(captured): State<Captured>, body: String| async move {
                    captured.lock().unwrap().push(body);
                    status
                }),
            )
            .with_state(captured.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        (Endpoint::new("127.0.0.1", port), captured)
    }

    #[test]
    fn payload_round_trip() {
        let payload = LokiPushPayload::single_entry(1_700_000_000_123_456_789, MESSAGE);
        let encoded = serde_json::to_string(&payload).unwrap();
        assert_eq!(
            encoded,
            r#"{"streams":[{"stream":{"app":"otel-test-daemon","log_level":"info"},"values":[["1700000000123456789","Test Loki message"]]}]}"#
        );

        let decoded: LokiPushPayload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_eq!(decoded.streams.len(), 1);

        let stream = &decoded.streams[0];
        assert_eq!(stream.stream.get("app").map(String::as_str), Some(APP_NAME));
        assert_eq!(stream.stream.get("log_level").map(String::as_str), Some(LOG_LEVEL));
        assert_eq!(
            stream.values,
            vec![("1700000000123456789".to_string(), MESSAGE.to_string())]
        );
    }

    #[tokio::test]
    async fn emit_pushes_single_entry() {
        let (endpoint, captured) = spawn_loki(StatusCode::NO_CONTENT).await;
        let mut sink = LokiSink::new(endpoint, Duration::from_secs(5)).unwrap();

        sink.emit().await.unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.len(), 1);
        let payload: LokiPushPayload = serde_json::from_str(&captured[0]).unwrap();
        assert_eq!(payload.streams[0].values[0].1, MESSAGE);
        assert!(payload.streams[0].values[0].0.parse::<u64>().is_ok());
    }

    #[tokio::test]
    async fn emit_fails_on_error_status() {
        let (endpoint, _captured) = spawn_loki(StatusCode::BAD_REQUEST).await;
        let mut sink = LokiSink::new(endpoint, Duration::from_secs(5)).unwrap();

        match sink.emit().await {
            Err(EmitError::Status { status, .. }) => assert_eq!(status.as_u16(), 400),
            other => panic!("unexpected emit result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn emit_fails_when_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut sink = LokiSink::new(Endpoint::new("127.0.0.1", port), Duration::from_secs(2)).unwrap();
        assert!(matches!(sink.emit().await, Err(EmitError::Http { .. })));
    }
}
