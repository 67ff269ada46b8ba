use thiserror::Error;

/// Every failure a Tether component can report.
///
/// Variants fall into three families:
///
/// - **Client-side**: [`NoAvailableConnection`](Self::NoAvailableConnection),
///   [`ProxyUnavailable`](Self::ProxyUnavailable),
///   [`CorrelationNotFound`](Self::CorrelationNotFound),
///   [`Cancelled`](Self::Cancelled), [`PoolTimeout`](Self::PoolTimeout),
///   [`Timeout`](Self::Timeout)
/// - **Server-side**: [`ServerSide`](Self::ServerSide), raised to a caller when
///   the remote invocation produced an exceptional result
/// - **Connection**: [`Connection`](Self::Connection),
///   [`FrameTooLarge`](Self::FrameTooLarge), [`InvalidFrame`](Self::InvalidFrame),
///   [`Io`](Self::Io) and JSON decode failures
///
/// Connection errors never reach unrelated callers; the client turns them into
/// a connection-loss event for the proxy that observed them.
#[derive(Error, Debug)]
pub enum TetherError {
    #[error("No available connection in pool")]
    NoAvailableConnection,

    #[error("Proxy unavailable: {0}")]
    ProxyUnavailable(String),

    #[error("No pending request with id {0}")]
    CorrelationNotFound(u64),

    #[error("Request {0} was cancelled")]
    Cancelled(u64),

    #[error("Pool acquisition timeout after {0}ms")]
    PoolTimeout(u64),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Frame size {size} exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    #[error("Server-side error: {0}")]
    ServerSide(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TetherError {
    /// Returns `true` for errors that mean the underlying connection is no
    /// longer usable and must go through reconnect handling.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TetherError::Connection(_)
                | TetherError::FrameTooLarge { .. }
                | TetherError::InvalidFrame(_)
                | TetherError::JsonSerialization(_)
                | TetherError::Io(_)
        )
    }
}

impl From<std::net::AddrParseError> for TetherError {
    fn from(err: std::net::AddrParseError) -> Self {
        TetherError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TetherError>;
