//! Connection proxies.
//!
//! A [`ConnectionProxy`] wraps one persistent connection to one server. It
//! owns the connection's lifecycle state, its pending-request table and its
//! reconnect budget. The state machine:
//!
//! ```text
//!              connect ok                loss
//!   (new) ──────────────▶ Active ─────────────────▶ Inactive
//!                         │  ▲ ◀──── reconnect ok ────┘  │
//!                   pause │  │ resume                    │ retries exhausted
//!                         ▼  │                           ▼
//!                         Paused ──────── stop() ─────▶ Stopped ──restart ok──▶ Active
//! ```
//!
//! `stop()` works from every state. Losing the connection while paused also
//! leads to `Inactive`; a proxy paused while `Inactive` stays paused when its
//! reconnect succeeds.
//!
//! Timed work (reconnect attempts, grace-window drains) runs on spawned tasks
//! that hold only a weak reference to the proxy. Those tasks go to the runtime
//! the proxy was connected on, so the synchronous lifecycle calls work from
//! any thread.

use std::fmt;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tether_common::transport::{wrap_stream, JsonCodec};
use tether_common::{Command, Request, Response, Result, TetherError};

use crate::config::{PauseGracePolicy, ProxySettings, RemoteServer};
use crate::connection::{ConnectionEvents, ConnectionHandle};
use crate::future::ResponseFuture;
use crate::pending::{PendingRequestTable, RequestIdGenerator};

/// Stable identity of a proxy within a pool, starting at 1.
pub type ProxyId = u32;

/// Lifecycle state of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyState {
    /// Not connected; a reconnect may be in progress
    Inactive,
    /// Connected and accepting requests
    Active,
    /// Rejecting new requests; pending ones drain after the grace window
    Paused,
    /// Terminal until [`ConnectionProxy::restart`]
    Stopped,
}

impl fmt::Display for ProxyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProxyState::Inactive => "inactive",
            ProxyState::Active => "active",
            ProxyState::Paused => "paused",
            ProxyState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

struct ProxyInner {
    state: ProxyState,
    connection: Option<ConnectionHandle>,
    /// Incremented for every installed connection
    generation: u64,
    retries_left: u32,
    /// Reconnect attempts made over the proxy's lifetime
    reconnect_attempts: u64,
    reconnect_task: Option<JoinHandle<()>>,
    pause_drain: Option<JoinHandle<()>>,
    stop_drain: Option<JoinHandle<()>>,
    restarting: bool,
    /// Set by `shutdown`; a closed proxy never connects again
    closed: bool,
}

impl ProxyInner {
    fn connection_is_live(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.is_live())
    }
}

/// A managed connection to one server.
///
/// # Thread Safety
///
/// All state lives behind a single `parking_lot::Mutex` that is never held
/// across an `.await`. The pending-request table has its own lock, always
/// taken after the proxy lock when both are needed.
pub struct ConnectionProxy {
    id: ProxyId,
    server: RemoteServer,
    settings: Arc<ProxySettings>,
    table: Arc<PendingRequestTable>,
    ids: RequestIdGenerator,
    inner: Mutex<ProxyInner>,
    /// Signalled whenever this proxy may have become available
    availability: Arc<Notify>,
    runtime: Handle,
    self_ref: Weak<ConnectionProxy>,
}

impl ConnectionProxy {
    fn new(
        id: ProxyId,
        server: RemoteServer,
        settings: Arc<ProxySettings>,
        availability: Arc<Notify>,
        runtime: Handle,
    ) -> Arc<Self> {
        let retries = settings.reconnect_max_retries;
        Arc::new_cyclic(|self_ref| Self {
            id,
            server,
            settings,
            table: PendingRequestTable::new(),
            ids: RequestIdGenerator::new(),
            inner: Mutex::new(ProxyInner {
                state: ProxyState::Inactive,
                connection: None,
                generation: 0,
                retries_left: retries,
                reconnect_attempts: 0,
                reconnect_task: None,
                pause_drain: None,
                stop_drain: None,
                restarting: false,
                closed: false,
            }),
            availability,
            runtime,
            self_ref: self_ref.clone(),
        })
    }

    /// Creates a proxy and opens its first connection.
    ///
    /// # Errors
    ///
    /// Returns the connect error; no proxy exists in that case. Must be
    /// called on a tokio runtime.
    pub async fn connect(
        id: ProxyId,
        server: RemoteServer,
        settings: Arc<ProxySettings>,
        availability: Arc<Notify>,
    ) -> Result<Arc<Self>> {
        let runtime = Handle::try_current()
            .map_err(|e| TetherError::Connection(format!("no tokio runtime to connect on: {}", e)))?;
        let stream = settings.connector.connect(&server.host, server.port).await?;
        let proxy = Self::new(id, server, settings, availability, runtime);
        {
            let mut inner = proxy.inner.lock();
            proxy.install_connection(&mut inner, stream);
            inner.state = ProxyState::Active;
        }
        info!(proxy = %proxy, "proxy connected");
        Ok(proxy)
    }

    pub fn id(&self) -> ProxyId {
        self.id
    }

    pub fn server(&self) -> &RemoteServer {
        &self.server
    }

    pub fn host(&self) -> &str {
        &self.server.host
    }

    pub fn port(&self) -> u16 {
        self.server.port
    }

    pub fn state(&self) -> ProxyState {
        self.inner.lock().state
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == ProxyState::Stopped
    }

    /// `Active` with a live connection.
    pub fn is_available(&self) -> bool {
        let inner = self.inner.lock();
        inner.state == ProxyState::Active && inner.connection_is_live()
    }

    pub fn pending_count(&self) -> usize {
        self.table.len()
    }

    pub fn has_pending(&self) -> bool {
        !self.table.is_empty()
    }

    pub fn pending_table(&self) -> &Arc<PendingRequestTable> {
        &self.table
    }

    /// Reconnect attempts left before the proxy gives up and stops.
    pub fn retries_left(&self) -> u32 {
        self.inner.lock().retries_left
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.inner.lock().reconnect_attempts
    }

    /// Whether `host`/`port` select this proxy. A blank host matches every
    /// proxy; a `None` port matches any port on `host`.
    pub fn matches(&self, host: &str, port: Option<u16>) -> bool {
        let host = host.trim();
        if host.is_empty() {
            return true;
        }
        host == self.server.host && port.map_or(true, |p| p == self.server.port)
    }

    // ------------------------------------------------------------------
    // Requests
    // ------------------------------------------------------------------

    /// Sends `command` and returns a future for its response.
    ///
    /// # Errors
    ///
    /// - [`TetherError::ProxyUnavailable`] unless the proxy is `Active`
    /// - [`TetherError::FrameTooLarge`] if the encoded request exceeds the
    ///   frame limit; the connection is left untouched
    pub fn send(&self, command: Command) -> Result<ResponseFuture> {
        let inner = self.inner.lock();
        if inner.state != ProxyState::Active {
            return Err(TetherError::ProxyUnavailable(format!("{} rejects new requests", self.describe(inner.state))));
        }
        let connection = inner
            .connection
            .as_ref()
            .ok_or_else(|| TetherError::ProxyUnavailable(format!("{} has no connection", self.describe(inner.state))))?;

        let id = self.ids.next_id();
        let payload = JsonCodec::encode_request(&Request::new(id, command))?;
        if payload.len() > self.settings.max_frame_size {
            return Err(TetherError::FrameTooLarge {
                size: payload.len(),
                max: self.settings.max_frame_size,
            });
        }

        let future = self.table.register(id)?;
        if let Err(e) = connection.send(Bytes::from(payload)) {
            future.cancel();
            return Err(TetherError::ProxyUnavailable(format!("{}: {}", self.describe(inner.state), e)));
        }
        Ok(future)
    }

    /// Routes a response to the pending future with the same id.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::CorrelationNotFound`] for late, cancelled or
    /// unknown ids.
    pub fn receive(&self, response: Response) -> Result<()> {
        self.table.complete(response)
    }

    /// Cancels every pending request. Returns how many were cancelled.
    pub fn cancel_waiting_requests(&self) -> usize {
        let cancelled = self.table.drain();
        if cancelled > 0 {
            info!(proxy = %self, cancelled, "cancelled waiting requests");
        }
        cancelled
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Stops accepting new requests. Requests still pending when the grace
    /// window ends are cancelled.
    ///
    /// Returns `false` if the proxy is stopped.
    pub fn pause(&self) -> bool {
        let mut inner = self.inner.lock();
        match inner.state {
            ProxyState::Stopped => {
                debug!(proxy = %self.describe(inner.state), "pause ignored");
                return false;
            }
            ProxyState::Paused => {
                let window_running = inner.pause_drain.as_ref().is_some_and(|t| !t.is_finished());
                if window_running && self.settings.pause_grace_policy == PauseGracePolicy::KeepWindow {
                    return true;
                }
            }
            ProxyState::Active | ProxyState::Inactive => {}
        }

        inner.state = ProxyState::Paused;
        if let Some(task) = inner.pause_drain.take() {
            task.abort();
        }
        inner.pause_drain = Some(self.spawn_pause_drain());
        info!(proxy = %self.describe(inner.state), "proxy paused");
        true
    }

    /// Leaves `Paused`: `Active` if the connection is live, otherwise
    /// `Inactive` with a reconnect scheduled. Cancels a pending pause drain.
    ///
    /// Returns `false` if the proxy was not paused.
    pub fn resume(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state != ProxyState::Paused {
            return false;
        }

        if let Some(task) = inner.pause_drain.take() {
            task.abort();
        }

        if inner.connection_is_live() {
            inner.state = ProxyState::Active;
        } else {
            inner.state = ProxyState::Inactive;
            self.schedule_reconnect(&mut inner);
        }
        info!(proxy = %self.describe(inner.state), "proxy resumed");
        drop(inner);

        self.availability.notify_waiters();
        true
    }

    /// Moves to `Stopped`. After the grace window, pending requests are
    /// cancelled and the connection is closed.
    ///
    /// Returns `false` if the proxy was already stopped.
    pub fn stop(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == ProxyState::Stopped {
            return false;
        }

        inner.state = ProxyState::Stopped;
        Self::abort_timers(&mut inner);
        inner.stop_drain = Some(self.spawn_stop_drain());
        info!(proxy = %self.describe(inner.state), "proxy stopped");
        true
    }

    /// Stops the proxy, cancels pending requests and closes the connection
    /// immediately. Safe to call in any state, including mid-reconnect.
    pub fn shutdown(&self) {
        let connection = {
            let mut inner = self.inner.lock();
            inner.state = ProxyState::Stopped;
            inner.closed = true;
            Self::abort_timers(&mut inner);
            if let Some(task) = inner.stop_drain.take() {
                task.abort();
            }
            inner.connection.take()
        };

        if let Some(connection) = connection {
            connection.close();
        }
        self.cancel_waiting_requests();
        debug!(proxy = %self, "proxy shut down");
    }

    /// Reconnects a stopped proxy.
    ///
    /// Any stop drain still waiting for its grace window runs immediately.
    /// On success the proxy becomes `Active` with a fresh id sequence and a
    /// full retry budget. On failure it stays `Stopped`; there is no automatic
    /// retry.
    ///
    /// Returns `Ok(false)` if the proxy was not stopped.
    pub async fn restart(&self) -> Result<bool> {
        let stale_connection = {
            let mut inner = self.inner.lock();
            if inner.state != ProxyState::Stopped || inner.restarting || inner.closed {
                return Ok(false);
            }
            inner.restarting = true;
            if let Some(task) = inner.stop_drain.take() {
                task.abort();
            }
            inner.connection.take()
        };
        if let Some(connection) = stale_connection {
            connection.close();
        }
        self.cancel_waiting_requests();

        let connected = self.open_stream().await;

        let mut inner = self.inner.lock();
        inner.restarting = false;
        let stream = match connected {
            Ok(stream) => stream,
            Err(e) => {
                error!(proxy = %self.describe(inner.state), error = %e, "restart failed");
                return Err(e);
            }
        };
        if inner.state != ProxyState::Stopped || inner.closed {
            return Ok(false);
        }

        self.ids.reset();
        self.install_connection(&mut inner, stream);
        inner.state = ProxyState::Active;
        inner.retries_left = self.settings.reconnect_max_retries;
        info!(proxy = %self.describe(inner.state), "proxy restarted");
        drop(inner);

        self.availability.notify_waiters();
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn describe(&self, state: ProxyState) -> String {
        format!("Proxy-{:02}/{}/{}", self.id, self.server, state)
    }

    async fn open_stream(&self) -> Result<TcpStream> {
        self.settings
            .connector
            .connect(&self.server.host, self.server.port)
            .await
    }

    fn install_connection(&self, inner: &mut ProxyInner, stream: TcpStream) {
        if let Some(old) = inner.connection.take() {
            old.close();
        }
        inner.generation += 1;

        let events: Weak<dyn ConnectionEvents> = self.self_ref.clone();
        inner.connection = Some(ConnectionHandle::spawn(
            wrap_stream(stream, self.settings.compression),
            inner.generation,
            self.settings.max_frame_size,
            self.settings.heartbeat_idle,
            events,
        ));
    }

    fn abort_timers(inner: &mut ProxyInner) {
        for task in [inner.reconnect_task.take(), inner.pause_drain.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
    }

    fn schedule_reconnect(&self, inner: &mut ProxyInner) {
        if inner.reconnect_task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        inner.reconnect_task = Some(self.runtime.spawn(reconnect_loop(
            self.self_ref.clone(),
            self.settings.clone(),
        )));
    }

    fn spawn_pause_drain(&self) -> JoinHandle<()> {
        let weak = self.self_ref.clone();
        let grace = self.settings.drain_grace;
        self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(proxy) = weak.upgrade() else { return };
            {
                let mut inner = proxy.inner.lock();
                if inner.state != ProxyState::Paused {
                    return;
                }
                inner.pause_drain = None;
            }
            proxy.cancel_waiting_requests();
        })
    }

    fn spawn_stop_drain(&self) -> JoinHandle<()> {
        let weak = self.self_ref.clone();
        let grace = self.settings.drain_grace;
        self.runtime.spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(proxy) = weak.upgrade() else { return };
            let connection = {
                let mut inner = proxy.inner.lock();
                if inner.state != ProxyState::Stopped {
                    return;
                }
                inner.stop_drain = None;
                inner.connection.take()
            };
            if let Some(connection) = connection {
                connection.close();
            }
            proxy.cancel_waiting_requests();
            debug!(proxy = %proxy, "stop drain finished, connection closed");
        })
    }

    /// Takes one retry from the budget if a reconnect should still happen.
    fn begin_reconnect_attempt(&self) -> Option<u32> {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, ProxyState::Inactive | ProxyState::Paused) || inner.connection_is_live() {
            return None;
        }
        if inner.retries_left == 0 {
            return None;
        }
        inner.retries_left -= 1;
        inner.reconnect_attempts += 1;
        Some(self.settings.reconnect_max_retries - inner.retries_left)
    }

    /// Installs a reconnected stream. Returns `false` if the proxy moved on
    /// (stopped or reconnected elsewhere) while the attempt was in flight.
    fn finish_reconnect(&self, stream: TcpStream) -> bool {
        let mut inner = self.inner.lock();
        if !matches!(inner.state, ProxyState::Inactive | ProxyState::Paused) || inner.connection_is_live() {
            return false;
        }

        self.install_connection(&mut inner, stream);
        if inner.state == ProxyState::Inactive {
            inner.state = ProxyState::Active;
        }
        inner.retries_left = self.settings.reconnect_max_retries;
        inner.reconnect_task = None;
        info!(proxy = %self.describe(inner.state), "proxy reconnected");
        drop(inner);

        self.availability.notify_waiters();
        true
    }

    fn give_up_reconnect(&self) {
        let should_stop = {
            let mut inner = self.inner.lock();
            // detach, the loop calling us is about to return
            inner.reconnect_task = None;
            matches!(inner.state, ProxyState::Inactive | ProxyState::Paused) && !inner.connection_is_live()
        };
        if should_stop {
            error!(proxy = %self, "reconnect attempts exhausted, stopping proxy");
            self.stop();
        }
    }
}

/// Bounded reconnect: every attempt waits `reconnect_delay` first, and the
/// proxy is stopped once the retry budget is spent.
async fn reconnect_loop(weak: Weak<ConnectionProxy>, settings: Arc<ProxySettings>) {
    loop {
        tokio::time::sleep(settings.reconnect_delay).await;

        let Some(proxy) = weak.upgrade() else { return };
        let Some(attempt) = proxy.begin_reconnect_attempt() else {
            if proxy.retries_left() == 0 {
                proxy.give_up_reconnect();
            }
            return;
        };

        info!(proxy = %proxy, attempt, max = settings.reconnect_max_retries, "reconnecting");
        match proxy.open_stream().await {
            Ok(stream) => {
                proxy.finish_reconnect(stream);
                return;
            }
            Err(e) => {
                warn!(proxy = %proxy, attempt, error = %e, "reconnect attempt failed");
                if proxy.retries_left() == 0 {
                    proxy.give_up_reconnect();
                    return;
                }
            }
        }
    }
}

impl ConnectionEvents for ConnectionProxy {
    fn on_response(&self, generation: u64, response: Response) {
        let id = response.id;
        // checked and completed under one lock so a restart cannot slip a
        // fresh request with the same id in between
        let outcome = {
            let inner = self.inner.lock();
            (inner.generation == generation).then(|| self.receive(response))
        };

        match outcome {
            None => {
                debug!(proxy = %self, generation, id, "response from a replaced connection dropped");
            }
            Some(Err(e)) => warn!(proxy = %self, error = %e, "response dropped"),
            Some(Ok(())) => {}
        }
    }

    fn on_connection_lost(&self, generation: u64, error: TetherError) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.connection = None;

        if inner.state == ProxyState::Stopped {
            debug!(proxy = %self.describe(inner.state), "stopped proxy lost its connection");
            return;
        }

        inner.state = ProxyState::Inactive;
        warn!(proxy = %self.describe(inner.state), error = %error, "connection lost, scheduling reconnect");
        self.schedule_reconnect(&mut inner);
        drop(inner);

        // responses for these ids can only arrive on the lost socket
        self.cancel_waiting_requests();
    }
}

impl fmt::Display for ConnectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe(self.state()))
    }
}

impl fmt::Debug for ConnectionProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProxy")
            .field("id", &self.id)
            .field("server", &self.server)
            .field("state", &self.state())
            .field("pending", &self.pending_count())
            .finish()
    }
}

impl Drop for ConnectionProxy {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        Self::abort_timers(inner);
        if let Some(task) = inner.stop_drain.take() {
            task.abort();
        }
        if let Some(connection) = inner.connection.take() {
            connection.close();
        }
    }
}
