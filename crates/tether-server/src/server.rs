//! Framed TCP server.
//!
//! One accept loop per configured port, one task per accepted connection.
//! Each connection reads NUL-delimited request frames and dispatches every
//! command on the blocking pool, so slow handlers never stall the reader and
//! responses may be written out of request order. Protocol violations
//! (undecodable or oversized frames) close only the offending connection.
//! With compression enabled every accepted stream is gzipped in both
//! directions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

use tether_common::transport::{wrap_stream, FrameCodec, JsonCodec};
use tether_common::{Command, RequestId, Response, Result, RpcResult, TetherError};
use tether_metrics::{CallMeasurer, ServerMeasurer};

use crate::config::ServerConfig;
use crate::invoker::{Invoker, SERVER_SIDE_EXCEPTION};

/// Async TCP server for Tether requests.
pub struct TcpServer {
    listeners: Vec<TcpListener>,
    dispatch: Arc<Dispatch>,
}

struct Dispatch {
    invoker: Arc<dyn Invoker>,
    measurer: Arc<dyn CallMeasurer>,
    max_frame_size: usize,
    compression: bool,
}

impl TcpServer {
    /// Binds a listener for every port in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TetherError::Config`] for an invalid configuration and
    /// [`TetherError::Connection`] when a port cannot be bound.
    pub async fn bind(config: &ServerConfig, invoker: Arc<dyn Invoker>) -> Result<Self> {
        config.validate()?;

        let mut listeners = Vec::with_capacity(config.ports.len());
        for port in &config.ports {
            let addr = format!("{}:{}", config.bind_host, port);
            let listener = TcpListener::bind(&addr).await.map_err(|e| {
                TetherError::Connection(format!("Failed to bind to {}: {}", addr, e))
            })?;
            listeners.push(listener);
        }

        Ok(Self {
            listeners,
            dispatch: Arc::new(Dispatch {
                invoker,
                measurer: Arc::new(ServerMeasurer::new()),
                max_frame_size: config.max_frame_size,
                compression: config.compression,
            }),
        })
    }

    /// Replaces the default [`ServerMeasurer`].
    pub fn with_measurer(mut self, measurer: Arc<dyn CallMeasurer>) -> Self {
        if let Some(dispatch) = Arc::get_mut(&mut self.dispatch) {
            dispatch.measurer = measurer;
        }
        self
    }

    pub fn measurer(&self) -> Arc<dyn CallMeasurer> {
        self.dispatch.measurer.clone()
    }

    /// Actual bound addresses, in configured port order.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.listeners
            .iter()
            .map(|l| {
                l.local_addr().map_err(|e| {
                    TetherError::Connection(format!("Failed to get local addr: {}", e))
                })
            })
            .collect()
    }

    /// Starts all accept loops in the background.
    pub fn spawn(self) -> Result<ServerHandle> {
        let addrs = self.local_addrs()?;
        let (shutdown, _) = watch::channel(false);

        let tasks = self
            .listeners
            .into_iter()
            .zip(addrs.iter().copied())
            .map(|(listener, addr)| {
                info!(addr = %addr, "listening");
                tokio::spawn(accept_loop(
                    listener,
                    self.dispatch.clone(),
                    shutdown.subscribe(),
                ))
            })
            .collect();

        Ok(ServerHandle {
            addrs,
            shutdown,
            tasks,
            measurer: self.dispatch.measurer.clone(),
        })
    }

    /// Serves until the process ends.
    pub async fn run(self) -> Result<()> {
        let handle = self.spawn()?;
        handle.wait().await;
        Ok(())
    }
}

/// Controls a spawned [`TcpServer`]. Dropping the handle shuts the server down.
pub struct ServerHandle {
    addrs: Vec<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
    measurer: Arc<dyn CallMeasurer>,
}

impl ServerHandle {
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.addrs
    }

    pub fn measurer(&self) -> &Arc<dyn CallMeasurer> {
        &self.measurer
    }

    /// Stops accepting and closes every open connection.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for all accept loops to finish.
    pub async fn wait(mut self) {
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn accept_loop(
    listener: TcpListener,
    dispatch: Arc<Dispatch>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "failed to accept connection");
                        continue;
                    }
                };
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "failed to set TCP_NODELAY");
                }
                debug!(peer = %peer, "connection established");

                let dispatch = dispatch.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    match serve_connection(stream, dispatch, shutdown).await {
                        Ok(()) => debug!(peer = %peer, "connection closed"),
                        Err(e) => warn!(peer = %peer, error = %e, "closing connection"),
                    }
                });
            }
        }
    }
}

async fn serve_connection(
    stream: TcpStream,
    dispatch: Arc<Dispatch>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut framed = Framed::new(
        wrap_stream(stream, dispatch.compression),
        FrameCodec::new(dispatch.max_frame_size),
    );
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<Response>();

    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            frame = framed.next() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => return Ok(()),
                };

                let request = JsonCodec::decode_request(&frame)?;
                if request.is_heartbeat() {
                    trace!("heartbeat");
                    continue;
                }
                let Some(command) = request.command else {
                    continue;
                };

                let dispatch = dispatch.clone();
                let done_tx = done_tx.clone();
                tokio::spawn(async move {
                    let response = dispatch.invoke(request.id, command).await;
                    // the receiver is gone only when the connection already closed
                    let _ = done_tx.send(response);
                });
            }
            Some(response) = done_rx.recv() => {
                let payload = dispatch.encode(response)?;
                framed.send(payload).await?;
            }
        }
    }
}

impl Dispatch {
    async fn invoke(&self, id: RequestId, command: Command) -> Response {
        let method = command.qualified_name();
        let start = Instant::now();

        let invoker = self.invoker.clone();
        let result = match tokio::task::spawn_blocking(move || invoker.execute(&command)).await {
            Ok(result) => result,
            Err(e) => RpcResult::exception(
                SERVER_SIDE_EXCEPTION,
                format!("invocation of {} failed: {}", method, e),
            ),
        };

        self.measurer.record_call(&method, start, !result.exceptional);
        trace!(id, method = %method, exceptional = result.exceptional, "dispatched");
        Response::new(id, result)
    }

    /// Encodes a response, replacing one that would not fit in a frame with
    /// an exceptional result so the caller is still answered.
    fn encode(&self, response: Response) -> Result<Bytes> {
        let payload = JsonCodec::encode_response(&response)?;
        if payload.len() <= self.max_frame_size {
            return Ok(Bytes::from(payload));
        }

        warn!(id = response.id, size = payload.len(), "response exceeds frame limit");
        let replacement = Response::new(
            response.id,
            RpcResult::exception(
                SERVER_SIDE_EXCEPTION,
                format!(
                    "response of {} bytes exceeds the {} byte frame limit",
                    payload.len(),
                    self.max_frame_size
                ),
            ),
        );
        Ok(Bytes::from(JsonCodec::encode_response(&replacement)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::demo::demo_registry;

    async fn bind_demo() -> TcpServer {
        let config = ServerConfig::with_ports(vec![0, 0]).bind_host("127.0.0.1");
        TcpServer::bind(&config, Arc::new(demo_registry())).await.unwrap()
    }

    #[tokio::test]
    async fn test_binds_every_port() {
        let server = bind_demo().await;
        let addrs = server.local_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
        assert_ne!(addrs[0].port(), addrs[1].port());
    }

    #[tokio::test]
    async fn test_rejects_invalid_config() {
        let result = TcpServer::bind(&ServerConfig::default(), Arc::new(demo_registry())).await;
        assert!(matches!(result, Err(TetherError::Config(_))));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let server = bind_demo().await;
        let taken = server.local_addrs().unwrap()[0].port();
        let config = ServerConfig::with_ports(vec![taken]).bind_host("127.0.0.1");
        let result = TcpServer::bind(&config, Arc::new(demo_registry())).await;
        assert!(matches!(result, Err(TetherError::Connection(_))));
    }

    #[test]
    fn test_oversized_response_is_replaced() {
        let dispatch = Dispatch {
            invoker: Arc::new(demo_registry()),
            measurer: Arc::new(ServerMeasurer::new()),
            max_frame_size: 64,
            compression: false,
        };
        let big = Response::new(9, RpcResult::value(serde_json::json!("x".repeat(500)), "string"));
        let encoded = dispatch.encode(big).unwrap();
        assert!(encoded.len() <= 256);

        let decoded = JsonCodec::decode_response(&encoded).unwrap();
        assert_eq!(decoded.id, 9);
        assert!(decoded.is_exceptional());
    }
}
