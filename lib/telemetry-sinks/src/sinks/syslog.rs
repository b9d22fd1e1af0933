use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use snafu::ResultExt as _;
use tokio::{io::AsyncWriteExt as _, net::TcpStream, time::timeout};
use tracing::info;

use super::{Connect, ConnectTimeout, EmitError, Sink, SinkKind, Write};
use crate::{Endpoint, APP_NAME};

/// Facility 4 (security/authorization), severity 2 (critical).
const PRIORITY: u8 = 34;
const VERSION: u8 = 1;
const MESSAGE: &str = "Test syslog message";

/// Formats an RFC 5424 syslog line, without a trailing newline.
///
/// Structured data and message ID are left empty (`-`).
pub fn format_syslog_line(timestamp: &str, app_name: &str, proc_id: u32, message: &str) -> String {
    format!(
        "<{}>{} {} {} {} - - - {}",
        PRIORITY, VERSION, timestamp, app_name, proc_id, message
    )
}

/// Syslog sink.
///
/// Opens a TCP connection per call to `emit`, writes a single newline-terminated syslog line, and closes the
/// connection.
pub struct SyslogSink {
    endpoint: Endpoint,
    proc_id: u32,
    connect_timeout: Duration,
}

impl SyslogSink {
    /// Creates a new `SyslogSink` writing to the given endpoint, identifying itself with the current process ID.
    pub fn new(endpoint: Endpoint, connect_timeout: Duration) -> Self {
        Self::with_proc_id(endpoint, connect_timeout, std::process::id())
    }

    /// Creates a new `SyslogSink` that identifies itself with the given process ID.
    pub fn with_proc_id(endpoint: Endpoint, connect_timeout: Duration, proc_id: u32) -> Self {
        Self {
            endpoint,
            proc_id,
            connect_timeout,
        }
    }

    fn build_line(&self) -> String {
        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        let mut line = format_syslog_line(&timestamp, APP_NAME, self.proc_id, MESSAGE);
        line.push('\n');
        line
    }
}

#[async_trait]
impl Sink for SyslogSink {
    fn kind(&self) -> SinkKind {
        SinkKind::LogLine
    }

    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    async fn emit(&mut self) -> Result<(), EmitError> {
        let address = (self.endpoint.host(), self.endpoint.port());
        let mut stream = match timeout(self.connect_timeout, TcpStream::connect(address)).await {
            Ok(result) => result.context(Connect {
                endpoint: self.endpoint.clone(),
            })?,
            Err(_) => {
                return ConnectTimeout {
                    endpoint: self.endpoint.clone(),
                }
                .fail()
            }
        };

        let line = self.build_line();
        stream.write_all(line.as_bytes()).await.context(Write {
            endpoint: self.endpoint.clone(),
        })?;
        stream.shutdown().await.context(Write {
            endpoint: self.endpoint.clone(),
        })?;

        info!(receiver = %self.endpoint, "Test syslog message sent to receiver.");
        Ok(())
    }
}
