//! Client configuration.
//!
//! A [`ClientConfig`] is plain data: the list of servers to connect to, how
//! many proxies to open, and the timing knobs of the connection lifecycle.
//! It can be built in code or loaded from a TOML file; durations are given in
//! milliseconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use tether_common::transport::{JsonCodec, TcpConnector, DEFAULT_MAX_FRAME_SIZE};
use tether_common::{Result, TetherError};

/// Default delay before each reconnect attempt (15 seconds)
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 15_000;
/// Default number of reconnect attempts before a proxy is stopped
pub const DEFAULT_RECONNECT_MAX_RETRIES: u32 = 3;
/// Default grace window before pending requests of a paused or stopped proxy are cancelled
pub const DEFAULT_DRAIN_GRACE_MS: u64 = 7_000;
/// Default connect timeout (15 seconds)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 15_000;
/// Default idle period before a heartbeat is sent (60 seconds)
pub const DEFAULT_HEARTBEAT_IDLE_MS: u64 = 60_000;

/// One server the pool connects to.
///
/// Parses from and displays as `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RemoteServer {
    pub host: String,
    pub port: u16,
}

impl RemoteServer {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RemoteServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for RemoteServer {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TetherError::Config(format!("Expected host:port, got '{}'", s)))?;
        if host.trim().is_empty() {
            return Err(TetherError::Config(format!("Missing host in '{}'", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| TetherError::Config(format!("Invalid port in '{}': {}", s, e)))?;
        Ok(Self::new(host.trim(), port))
    }
}

/// How the pool picks a proxy for a new request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionPolicy {
    /// Rotate through proxies with a shared cursor
    #[default]
    RoundRobin,
    /// Pick the proxy with the fewest pending requests, lowest id on ties
    Workload,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::RoundRobin => write!(f, "round_robin"),
            SelectionPolicy::Workload => write!(f, "workload"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = TetherError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "round_robin" => Ok(SelectionPolicy::RoundRobin),
            "workload" => Ok(SelectionPolicy::Workload),
            other => Err(TetherError::Config(format!(
                "Unknown selection policy '{}' (expected round_robin or workload)",
                other
            ))),
        }
    }
}

/// What a second `pause()` does to a drain window that is already running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseGracePolicy {
    /// Keep the original deadline
    #[default]
    KeepWindow,
    /// Cancel the pending drain and start a fresh window
    RestartWindow,
}

/// Client pool configuration.
///
/// # Fields
///
/// - `servers`: Servers to distribute proxies across, in order
/// - `pool_size`: Number of proxies to open at start-up
/// - `selection`: Default selection policy for [`ConnectionPool::select`](crate::ConnectionPool::select)
/// - `connect_timeout_ms`: Time allowed for one TCP connect
/// - `reconnect_max_retries`: Reconnect attempts before a lost proxy is stopped
/// - `reconnect_delay_ms`: Delay before each reconnect attempt
/// - `drain_grace_ms`: Grace window before a paused or stopped proxy cancels pending requests
/// - `heartbeat_idle_ms`: Idle time after which a heartbeat is sent
/// - `max_frame_size`: Largest payload accepted or sent, in bytes
/// - `pause_grace_policy`: Behavior of a repeated pause
/// - `compression`: Gzip the byte stream of every connection; the servers
///   must be started with compression too
///
/// # Example
///
/// ```rust
/// use tether_client::{ClientConfig, RemoteServer, SelectionPolicy};
///
/// let config = ClientConfig {
///     servers: vec![RemoteServer::new("127.0.0.1", 9090)],
///     pool_size: 4,
///     selection: SelectionPolicy::Workload,
///     ..Default::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub servers: Vec<RemoteServer>,
    pub pool_size: usize,
    pub selection: SelectionPolicy,
    pub connect_timeout_ms: u64,
    pub reconnect_max_retries: u32,
    pub reconnect_delay_ms: u64,
    pub drain_grace_ms: u64,
    pub heartbeat_idle_ms: u64,
    pub max_frame_size: usize,
    pub pause_grace_policy: PauseGracePolicy,
    pub compression: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            pool_size: num_cpus::get() * 2,
            selection: SelectionPolicy::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            reconnect_max_retries: DEFAULT_RECONNECT_MAX_RETRIES,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            drain_grace_ms: DEFAULT_DRAIN_GRACE_MS,
            heartbeat_idle_ms: DEFAULT_HEARTBEAT_IDLE_MS,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            pause_grace_policy: PauseGracePolicy::default(),
            compression: false,
        }
    }
}

impl ClientConfig {
    pub fn with_servers(servers: Vec<RemoteServer>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    /// Parses a TOML document. Missing keys take their defaults.
    ///
    /// ```toml
    /// pool_size = 4
    /// selection = "workload"
    ///
    /// [[servers]]
    /// host = "10.0.0.1"
    /// port = 9090
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: ClientConfig = toml::from_str(source)
            .map_err(|e| TetherError::Config(format!("Invalid client config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| {
            TetherError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    /// Checks the values a pool cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(TetherError::Config("No remote servers configured".into()));
        }
        if let Some(server) = self.servers.iter().find(|s| s.port == 0 || s.host.trim().is_empty()) {
            return Err(TetherError::Config(format!("Invalid remote server '{}'", server)));
        }
        if self.pool_size == 0 {
            return Err(TetherError::Config("pool_size must be at least 1".into()));
        }
        let heartbeat_len = JsonCodec::heartbeat_len()?;
        if self.max_frame_size < heartbeat_len {
            return Err(TetherError::Config(format!(
                "max_frame_size must be at least {} bytes to carry a heartbeat",
                heartbeat_len
            )));
        }
        if self.heartbeat_idle_ms == 0 {
            return Err(TetherError::Config("heartbeat_idle_ms must be at least 1".into()));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }

    pub fn heartbeat_idle(&self) -> Duration {
        Duration::from_millis(self.heartbeat_idle_ms)
    }
}

/// Per-proxy view of the configuration, shared by every proxy of one pool
/// generation.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub connector: TcpConnector,
    pub heartbeat_idle: Duration,
    pub max_frame_size: usize,
    pub reconnect_max_retries: u32,
    pub reconnect_delay: Duration,
    pub drain_grace: Duration,
    pub pause_grace_policy: PauseGracePolicy,
    pub compression: bool,
}

impl From<&ClientConfig> for ProxySettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connector: TcpConnector::new(config.connect_timeout()),
            heartbeat_idle: config.heartbeat_idle(),
            max_frame_size: config.max_frame_size,
            reconnect_max_retries: config.reconnect_max_retries,
            reconnect_delay: config.reconnect_delay(),
            drain_grace: config.drain_grace(),
            pause_grace_policy: config.pause_grace_policy,
            compression: config.compression,
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}
