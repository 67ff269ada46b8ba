use std::time::Duration;

use tokio::net::TcpStream;

use crate::protocol::error::{Result, TetherError};

/// Default time allowed for establishing one TCP connection (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Opens outbound TCP connections with a bounded connect timeout.
///
/// The returned stream has `TCP_NODELAY` set; frames are small and latency
/// sensitive.
///
/// # Example
///
/// ```no_run
/// use tether_common::transport::TcpConnector;
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let connector = TcpConnector::new(Duration::from_secs(5));
/// let stream = connector.connect("127.0.0.1", 9090).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Connects to `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Timeout`] when the attempt does not complete in
    /// time, and [`TetherError::Connection`] when it is refused or the host
    /// cannot be resolved.
    pub async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        let addr = format!("{}:{}", host, port);

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| TetherError::Timeout(self.connect_timeout.as_millis() as u64))?
            .map_err(|e| map_io_error(e, &addr))?;

        stream
            .set_nodelay(true)
            .map_err(|e| TetherError::Connection(format!("Failed to set TCP_NODELAY on {}: {}", addr, e)))?;

        Ok(stream)
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

/// Map IO errors from a connect attempt to TetherError variants
///
/// - Refused/reset/unreachable -> `Connection`
/// - Everything else -> `Io`
fn map_io_error(err: std::io::Error, addr: &str) -> TetherError {
    match err.kind() {
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::AddrNotAvailable => {
            TetherError::Connection(format!("Failed to connect to {}: {}", addr, err))
        }
        _ => TetherError::Io(err),
    }
}
