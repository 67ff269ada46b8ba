use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use tether_common::{Result, TetherError};

use crate::config::{ClientConfig, ProxySettings, RemoteServer, SelectionPolicy};
use crate::proxy::{ConnectionProxy, ProxyId};

struct PoolInner {
    proxies: BTreeMap<ProxyId, Arc<ConnectionProxy>>,
    /// Round-robin position, always below `proxies.len()` when non-empty
    cursor: usize,
    started: bool,
}

/// Pool of persistent connection proxies.
///
/// The pool opens `pool_size` proxies at start-up, spread round-robin across
/// the configured servers, and hands one out per request through a
/// [`SelectionPolicy`].
///
/// # Architecture
///
/// - Proxies are keyed by id (1..=pool_size) in a `BTreeMap`; iteration order
///   is id order, which round-robin relies on
/// - The map and the round-robin cursor share one `parking_lot::Mutex`
/// - Callers that find nothing available wait on a `tokio::sync::Notify`,
///   signalled by successful reconnects, resumes and restarts
/// - `start_up`, `shutdown` and `reconfigure` are serialized by an async
///   lifecycle lock
///
/// # Example
///
/// ```rust,no_run
/// use tether_client::{ClientConfig, ConnectionPool, RemoteServer, SelectionPolicy};
/// use tether_common::Command;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ClientConfig::with_servers(vec![RemoteServer::new("127.0.0.1", 9090)]);
/// let pool = ConnectionPool::new(config);
/// pool.start_up().await?;
///
/// let proxy = pool.select_proxy(SelectionPolicy::RoundRobin).await?;
/// let response = proxy.send(Command::new("demo.Echo", "echo"))?.get().await?;
///
/// pool.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ConnectionPool {
    config: Mutex<ClientConfig>,
    inner: Mutex<PoolInner>,
    availability: Arc<Notify>,
    lifecycle: tokio::sync::Mutex<()>,
}

impl ConnectionPool {
    /// Creates an idle pool. Nothing connects until [`start_up`](Self::start_up).
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Mutex::new(config),
            inner: Mutex::new(PoolInner {
                proxies: BTreeMap::new(),
                cursor: 0,
                started: false,
            }),
            availability: Arc::new(Notify::new()),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> ClientConfig {
        self.config.lock().clone()
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().started
    }

    pub fn len(&self) -> usize {
        self.inner.lock().proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Connects the configured number of proxies.
    ///
    /// Proxy `i` (0-based) gets id `i + 1` and targets server `i % servers`.
    /// A server that cannot be reached is dropped from the rotation and the
    /// same slot is retried on the next one.
    ///
    /// # Returns
    ///
    /// `Ok(false)` if the pool is already started.
    ///
    /// # Errors
    ///
    /// - [`TetherError::Config`] if the configuration is invalid
    /// - [`TetherError::Connection`] if no server could be reached
    pub async fn start_up(&self) -> Result<bool> {
        let _lifecycle = self.lifecycle.lock().await;
        self.start_up_locked().await
    }

    /// Stops every proxy, cancels their pending requests and closes their
    /// connections, then wakes every caller waiting for a proxy.
    ///
    /// Idempotent, and safe while proxies are reconnecting.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.shutdown_locked();
    }

    /// Shuts the pool down, swaps in `config` and starts again.
    ///
    /// The new configuration is validated first; an invalid one leaves the
    /// running pool untouched.
    pub async fn reconfigure(&self, config: ClientConfig) -> Result<bool> {
        config.validate()?;

        let _lifecycle = self.lifecycle.lock().await;
        info!(servers = config.servers.len(), pool_size = config.pool_size, "reconfiguring pool");
        self.shutdown_locked();
        *self.config.lock() = config;
        self.start_up_locked().await
    }

    async fn start_up_locked(&self) -> Result<bool> {
        if self.inner.lock().started {
            return Ok(false);
        }

        let config = self.config();
        config.validate()?;
        let settings = Arc::new(ProxySettings::from(&config));

        let mut servers: Vec<RemoteServer> = config.servers.clone();
        let mut proxies = BTreeMap::new();
        let mut slot = 0usize;

        while slot < config.pool_size && !servers.is_empty() {
            let server = servers[slot % servers.len()].clone();
            let id = slot as ProxyId + 1;

            match ConnectionProxy::connect(id, server.clone(), settings.clone(), self.availability.clone()).await {
                Ok(proxy) => {
                    proxies.insert(id, proxy);
                    slot += 1;
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "server unreachable, removing it from start-up");
                    servers.retain(|s| s != &server);
                }
            }
        }

        if proxies.is_empty() {
            error!("no configured server could be reached");
            return Err(TetherError::Connection("no configured server could be reached".into()));
        }
        if proxies.len() < config.pool_size {
            warn!(opened = proxies.len(), requested = config.pool_size, "pool started short");
        }

        let opened = proxies.len();
        {
            let mut inner = self.inner.lock();
            inner.proxies = proxies;
            inner.cursor = 0;
            inner.started = true;
        }
        info!(proxies = opened, selection = %config.selection, "connection pool started");

        self.availability.notify_waiters();
        Ok(true)
    }

    fn shutdown_locked(&self) {
        let proxies = {
            let mut inner = self.inner.lock();
            inner.started = false;
            inner.cursor = 0;
            std::mem::take(&mut inner.proxies)
        };

        if proxies.is_empty() {
            return;
        }

        for proxy in proxies.values() {
            proxy.shutdown();
        }
        info!(proxies = proxies.len(), "connection pool shut down");

        // waiters re-check and see an empty pool
        self.availability.notify_waiters();
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    /// Selects a proxy with the configured policy, waiting while none is
    /// available.
    pub async fn select(&self) -> Result<Arc<ConnectionProxy>> {
        let policy = self.config.lock().selection;
        self.select_proxy(policy).await
    }

    /// Selects an available proxy.
    ///
    /// Waits without polling until some proxy becomes available (reconnect,
    /// resume or restart).
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::NoAvailableConnection`] when the pool has no
    /// proxies at all, including when it is shut down while waiting.
    pub async fn select_proxy(&self, policy: SelectionPolicy) -> Result<Arc<ConnectionProxy>> {
        loop {
            let notified = self.availability.notified();
            tokio::pin!(notified);
            // register before checking so a wake-up between the check and
            // the await is not lost
            notified.as_mut().enable();

            if let Some(proxy) = self.try_select_proxy(policy)? {
                return Ok(proxy);
            }

            debug!(policy = %policy, "no proxy available, waiting");
            notified.await;
        }
    }

    /// Like [`select_proxy`](Self::select_proxy), giving up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::PoolTimeout`] when no proxy became available
    /// in time.
    pub async fn select_proxy_timeout(
        &self,
        policy: SelectionPolicy,
        timeout: Duration,
    ) -> Result<Arc<ConnectionProxy>> {
        tokio::time::timeout(timeout, self.select_proxy(policy))
            .await
            .map_err(|_| TetherError::PoolTimeout(timeout.as_millis() as u64))?
    }

    /// One selection pass without waiting.
    ///
    /// Returns `Ok(None)` when proxies exist but none is available.
    pub fn try_select_proxy(&self, policy: SelectionPolicy) -> Result<Option<Arc<ConnectionProxy>>> {
        let mut inner = self.inner.lock();
        if inner.proxies.is_empty() {
            return Err(TetherError::NoAvailableConnection);
        }

        let candidates: Vec<Arc<ConnectionProxy>> = inner.proxies.values().cloned().collect();
        let picked = policy.pick(&candidates, &mut inner.cursor);
        Ok(picked.map(|idx| candidates[idx].clone()))
    }

    // ------------------------------------------------------------------
    // Targeted lifecycle operations
    // ------------------------------------------------------------------

    pub fn find_proxy_by_id(&self, id: ProxyId) -> Option<Arc<ConnectionProxy>> {
        self.inner.lock().proxies.get(&id).cloned()
    }

    /// Proxies connected to `host`/`port`, in id order. A blank host matches
    /// the whole pool; a `None` port matches any port.
    pub fn find_proxies(&self, host: &str, port: Option<u16>) -> Vec<Arc<ConnectionProxy>> {
        self.inner
            .lock()
            .proxies
            .values()
            .filter(|p| p.matches(host, port))
            .cloned()
            .collect()
    }

    /// Every proxy in id order.
    pub fn list_proxies(&self) -> Vec<Arc<ConnectionProxy>> {
        self.find_proxies("", None)
    }

    /// Pauses matching proxies. Returns how many were paused.
    ///
    /// Like `resume` and `stop`, this does not need to run on the runtime:
    /// grace-window timers go to the runtime each proxy was connected on.
    pub fn pause(&self, host: &str, port: Option<u16>) -> usize {
        let paused = self
            .find_proxies(host, port)
            .iter()
            .filter(|p| p.pause())
            .count();
        info!(host, ?port, paused, "paused proxies");
        paused
    }

    /// Resumes matching paused proxies and wakes waiting selectors.
    pub fn resume(&self, host: &str, port: Option<u16>) -> usize {
        let resumed = self
            .find_proxies(host, port)
            .iter()
            .filter(|p| p.resume())
            .count();
        self.availability.notify_waiters();
        resumed
    }

    /// Stops matching proxies. Returns how many were stopped.
    pub fn stop(&self, host: &str, port: Option<u16>) -> usize {
        let stopped = self
            .find_proxies(host, port)
            .iter()
            .filter(|p| p.stop())
            .count();
        info!(host, ?port, stopped, "stopped proxies");
        stopped
    }

    /// Restarts matching stopped proxies and resumes matching paused ones,
    /// then wakes waiting selectors.
    ///
    /// Returns how many proxies were restarted or resumed. A failed restart is
    /// logged and leaves that proxy stopped.
    pub async fn restart(&self, host: &str, port: Option<u16>) -> usize {
        let mut restarted = 0;
        for proxy in self.find_proxies(host, port) {
            if proxy.is_stopped() {
                match proxy.restart().await {
                    Ok(true) => restarted += 1,
                    Ok(false) => {}
                    Err(e) => warn!(proxy = %proxy, error = %e, "restart failed"),
                }
            } else if proxy.resume() {
                restarted += 1;
            }
        }

        info!(host, ?port, restarted, "restarted proxies");
        self.availability.notify_waiters();
        restarted
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("started", &self.is_started())
            .field("proxies", &self.list_proxies())
            .finish()
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        for proxy in self.inner.get_mut().proxies.values() {
            proxy.shutdown();
        }
    }
}
