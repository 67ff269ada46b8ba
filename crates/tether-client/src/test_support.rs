//! Loopback servers and settings shared by the unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_util::codec::Framed;

use tether_common::transport::{FrameCodec, JsonCodec, TcpConnector};
use tether_common::{Response, RpcResult};

use crate::config::{PauseGracePolicy, ProxySettings, RemoteServer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Reply with the first parameter's value
    Echo,
    /// Read requests, never reply
    Silent,
}

#[derive(Default)]
pub struct Counters {
    pub accepted: AtomicUsize,
    pub requests: AtomicUsize,
    pub heartbeats: AtomicUsize,
}

pub struct MockServer {
    pub port: u16,
    pub counters: Arc<Counters>,
    kill: watch::Sender<bool>,
}

impl MockServer {
    pub async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        Self::serve(listener, mode, port)
    }

    /// Serves on a specific port, e.g. to bring a killed server back.
    pub async fn start_on(port: u16, mode: Mode) -> Self {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.unwrap();
        Self::serve(listener, mode, port)
    }

    fn serve(listener: TcpListener, mode: Mode, port: u16) -> Self {
        let counters = Arc::new(Counters::default());
        let (kill, killed) = watch::channel(false);

        let accept_counters = counters.clone();
        let mut accept_killed = killed.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { return };
                        accept_counters.accepted.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(handle(stream, mode, accept_counters.clone(), killed.clone()));
                    }
                    _ = accept_killed.changed() => return,
                }
            }
        });

        Self { port, counters, kill }
    }

    pub fn server(&self) -> RemoteServer {
        RemoteServer::new("127.0.0.1", self.port)
    }

    /// Closes the listener and every accepted connection.
    pub fn kill(&self) {
        let _ = self.kill.send(true);
    }

    pub fn accepted(&self) -> usize {
        self.counters.accepted.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> usize {
        self.counters.requests.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.kill();
    }
}

async fn handle(stream: TcpStream, mode: Mode, counters: Arc<Counters>, mut killed: watch::Receiver<bool>) {
    let mut framed = Framed::new(stream, FrameCodec::default());
    loop {
        tokio::select! {
            frame = framed.next() => {
                let Some(Ok(frame)) = frame else { return };
                let Ok(request) = JsonCodec::decode_request(&frame) else { return };
                if request.is_heartbeat() {
                    counters.heartbeats.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
                counters.requests.fetch_add(1, Ordering::SeqCst);
                if mode == Mode::Silent {
                    continue;
                }

                let value = request
                    .command
                    .and_then(|c| c.params.into_iter().next())
                    .map(|p| p.value)
                    .unwrap_or(serde_json::Value::Null);
                let response = Response::new(request.id, RpcResult::value(value, "string"));
                let payload = JsonCodec::encode_response(&response).unwrap();
                if framed.send(Bytes::from(payload)).await.is_err() {
                    return;
                }
            }
            _ = killed.changed() => return,
        }
    }
}

/// A port with nothing listening on it.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Settings with short timers so lifecycle tests finish quickly.
pub fn fast_settings() -> ProxySettings {
    ProxySettings {
        connector: TcpConnector::new(Duration::from_millis(500)),
        heartbeat_idle: Duration::from_secs(60),
        max_frame_size: 8192,
        reconnect_max_retries: 3,
        reconnect_delay: Duration::from_millis(50),
        drain_grace: Duration::from_millis(100),
        pause_grace_policy: PauseGracePolicy::KeepWindow,
        compression: false,
    }
}

/// Polls `check` until it holds or five seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
