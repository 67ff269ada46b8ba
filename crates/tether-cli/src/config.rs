//! Client configuration from the command line, and file reload polling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{anyhow, Context, Result};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use tether_client::{ClientConfig, ConnectionPool, RemoteServer};

/// How often a watched config file is checked for changes.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(5);

/// Builds the client configuration for a client subcommand.
///
/// Servers given on the command line replace the file's server list. At
/// least one of the two sources is required.
pub fn resolve_client_config(path: Option<&Path>, servers: &[RemoteServer]) -> Result<ClientConfig> {
    let mut config = match path {
        Some(path) => ClientConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None if servers.is_empty() => {
            return Err(anyhow!("either --config or at least one --server is required"));
        }
        None => ClientConfig::default(),
    };

    if !servers.is_empty() {
        config.servers = servers.to_vec();
    }
    config.validate()?;
    Ok(config)
}

/// Re-reads a config file whenever its modification time changes and
/// reconfigures the pool with it.
///
/// A file that fails to load or validate is reported and skipped; the pool
/// keeps running with its previous configuration.
pub struct ConfigReloader {
    path: PathBuf,
    pool: Arc<ConnectionPool>,
    interval: Duration,
    last_modified: Option<SystemTime>,
}

impl ConfigReloader {
    pub fn new(path: impl Into<PathBuf>, pool: Arc<ConnectionPool>) -> Self {
        let path = path.into();
        let last_modified = modified(&path);
        Self {
            path,
            pool,
            interval: DEFAULT_RELOAD_INTERVAL,
            last_modified,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Reloads if the file changed since the last check. Returns whether the
    /// pool was reconfigured.
    pub async fn check(&mut self) -> Result<bool> {
        let current = modified(&self.path);
        if current.is_none() || current == self.last_modified {
            return Ok(false);
        }
        self.last_modified = current;

        debug!(path = %self.path.display(), "config file changed");
        let config = ClientConfig::load(&self.path)
            .with_context(|| format!("failed to reload {}", self.path.display()))?;
        self.pool.reconfigure(config).await?;
        info!(path = %self.path.display(), proxies = self.pool.len(), "pool reconfigured");
        Ok(true)
    }

    /// Polls in the background until the task is aborted.
    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.check().await {
                    warn!(error = %e, "config reload failed");
                }
            }
        })
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tether_server::demo::demo_registry;
    use tether_server::{ServerConfig, ServerHandle, TcpServer};

    async fn start_server() -> ServerHandle {
        let config = ServerConfig::with_ports(vec![0]).bind_host("127.0.0.1");
        TcpServer::bind(&config, Arc::new(demo_registry()))
            .await
            .unwrap()
            .spawn()
            .unwrap()
    }

    fn write_config(file: &Path, port: u16, pool_size: usize, bump: u64) {
        let mut f = File::create(file).unwrap();
        writeln!(
            f,
            "pool_size = {pool_size}\nconnect_timeout_ms = 500\n\n[[servers]]\nhost = \"127.0.0.1\"\nport = {port}\n"
        )
        .unwrap();
        // coarse filesystem timestamps would otherwise hide quick rewrites
        f.set_modified(SystemTime::now() + Duration::from_secs(bump)).unwrap();
    }

    #[test]
    fn test_resolve_from_servers() {
        let servers = vec![RemoteServer::new("10.0.0.1", 9090)];
        let config = resolve_client_config(None, &servers).unwrap();
        assert_eq!(config.servers, servers);
    }

    #[test]
    fn test_resolve_requires_a_source() {
        assert!(resolve_client_config(None, &[]).is_err());
    }

    #[test]
    fn test_resolve_servers_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        write_config(&path, 7000, 3, 0);

        let config = resolve_client_config(Some(&path), &[]).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.servers[0].port, 7000);

        let override_servers = vec![RemoteServer::new("127.0.0.1", 7001)];
        let config = resolve_client_config(Some(&path), &override_servers).unwrap();
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.servers, override_servers);
    }

    #[tokio::test]
    async fn test_reload_reconfigures_pool() {
        let first = start_server().await;
        let second = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");

        write_config(&path, first.local_addrs()[0].port(), 1, 0);
        let pool = Arc::new(ConnectionPool::new(ClientConfig::load(&path).unwrap()));
        pool.start_up().await.unwrap();

        let mut reloader = ConfigReloader::new(&path, pool.clone());
        assert!(!reloader.check().await.unwrap());

        let second_port = second.local_addrs()[0].port();
        write_config(&path, second_port, 2, 10);
        assert!(reloader.check().await.unwrap());

        let proxies = pool.list_proxies();
        assert_eq!(proxies.len(), 2);
        assert!(proxies.iter().all(|p| p.port() == second_port));

        // unchanged file is not reloaded again
        assert!(!reloader.check().await.unwrap());
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_pool() {
        let server = start_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");

        write_config(&path, server.local_addrs()[0].port(), 1, 0);
        let pool = Arc::new(ConnectionPool::new(ClientConfig::load(&path).unwrap()));
        pool.start_up().await.unwrap();

        let mut reloader = ConfigReloader::new(&path, pool.clone());
        let mut f = File::create(&path).unwrap();
        writeln!(f, "pool_size = 0").unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(10)).unwrap();

        assert!(reloader.check().await.is_err());
        assert!(pool.is_started());
        assert_eq!(pool.len(), 1);
    }
}
