//! Server configuration.

use serde::{Deserialize, Serialize};

use tether_common::transport::{JsonCodec, DEFAULT_MAX_FRAME_SIZE};
use tether_common::{Result, TetherError};

pub const DEFAULT_BIND_HOST: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address every listener binds to
    pub bind_host: String,
    /// One listener per port; port 0 picks an ephemeral port
    pub ports: Vec<u16>,
    pub max_frame_size: usize,
    /// Gzip every connection's byte stream; clients must match
    pub compression: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: DEFAULT_BIND_HOST.to_string(),
            ports: Vec::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            compression: false,
        }
    }
}

impl ServerConfig {
    pub fn with_ports(ports: Vec<u16>) -> Self {
        Self {
            ports,
            ..Default::default()
        }
    }

    pub fn bind_host(mut self, host: impl Into<String>) -> Self {
        self.bind_host = host.into();
        self
    }

    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(TetherError::Config("at least one port is required".into()));
        }
        if self.bind_host.trim().is_empty() {
            return Err(TetherError::Config("bind host must not be blank".into()));
        }
        // clients send heartbeats on idle connections
        let heartbeat_len = JsonCodec::heartbeat_len()?;
        if self.max_frame_size < heartbeat_len {
            return Err(TetherError::Config(format!(
                "max_frame_size must be at least {} bytes",
                heartbeat_len
            )));
        }
        Ok(())
    }
}
