//! Connection driver.
//!
//! Each live socket is served by exactly one tokio task. The task owns the
//! framed stream and multiplexes three event sources:
//!
//! - inbound frames, decoded and routed to the owner through [`ConnectionEvents`]
//! - outbound payloads queued by [`ConnectionHandle::send`]
//! - an idle timer that emits a heartbeat when no traffic flowed in either
//!   direction for the configured period
//!
//! Any read, decode, write or heartbeat failure ends the task and is reported
//! once as a connection loss. Closing the handle ends the task silently.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use tether_common::transport::{ByteStream, FrameCodec, JsonCodec};
use tether_common::{Request, Response, Result, TetherError};

/// Callbacks from a connection driver to the proxy that owns it.
///
/// `generation` identifies the connection instance; owners ignore events from
/// a generation they have already replaced.
pub trait ConnectionEvents: Send + Sync {
    fn on_response(&self, generation: u64, response: Response);
    fn on_connection_lost(&self, generation: u64, error: TetherError);
}

/// Owner-side handle to a running connection driver.
#[derive(Debug)]
pub struct ConnectionHandle {
    generation: u64,
    outbound: mpsc::UnboundedSender<Bytes>,
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Starts a driver task for `stream`.
    pub fn spawn<S: ByteStream + 'static>(
        stream: S,
        generation: u64,
        max_frame_size: usize,
        heartbeat_idle: Duration,
        events: Weak<dyn ConnectionEvents>,
    ) -> Self {
        let (outbound, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let framed = Framed::new(stream, FrameCodec::new(max_frame_size));

        let driver = Driver {
            framed,
            outbound: rx,
            heartbeat_idle,
            generation,
            alive: alive.clone(),
        };
        let task = tokio::spawn(driver.run(events));

        Self {
            generation,
            outbound,
            alive,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the driver is still running and the socket has not failed.
    pub fn is_live(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    /// Queues an already-encoded payload for writing.
    pub fn send(&self, payload: Bytes) -> Result<()> {
        if !self.alive.load(Ordering::Acquire) {
            return Err(TetherError::Connection("connection is closed".into()));
        }
        self.outbound
            .send(payload)
            .map_err(|_| TetherError::Connection("connection driver has exited".into()))
    }

    /// Stops the driver and closes the socket without reporting a loss.
    pub fn close(self) {
        self.alive.store(false, Ordering::Release);
        self.task.abort();
    }
}

enum Exit {
    /// Owner dropped or closed the handle
    Closed,
    Lost(TetherError),
}

struct Driver<S> {
    framed: Framed<S, FrameCodec>,
    outbound: mpsc::UnboundedReceiver<Bytes>,
    heartbeat_idle: Duration,
    generation: u64,
    alive: Arc<AtomicBool>,
}

impl<S: ByteStream> Driver<S> {
    async fn run(mut self, events: Weak<dyn ConnectionEvents>) {
        let exit = self.pump(&events).await;
        self.alive.store(false, Ordering::Release);

        match exit {
            Exit::Closed => {
                debug!(generation = self.generation, "connection closed by owner");
            }
            Exit::Lost(error) => {
                warn!(generation = self.generation, error = %error, "connection lost");
                if let Some(owner) = events.upgrade() {
                    owner.on_connection_lost(self.generation, error);
                }
            }
        }
    }

    async fn pump(&mut self, events: &Weak<dyn ConnectionEvents>) -> Exit {
        let mut last_activity = Instant::now();

        loop {
            let idle_deadline = last_activity + self.heartbeat_idle;

            tokio::select! {
                frame = self.framed.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(e)) => return Exit::Lost(e),
                        None => {
                            return Exit::Lost(TetherError::Connection("connection closed by peer".into()))
                        }
                    };
                    last_activity = Instant::now();

                    let response = match JsonCodec::decode_response(&frame) {
                        Ok(response) => response,
                        Err(e) => return Exit::Lost(e),
                    };
                    trace!(generation = self.generation, id = response.id, "response frame");

                    match events.upgrade() {
                        Some(owner) => owner.on_response(self.generation, response),
                        None => return Exit::Closed,
                    }
                }
                payload = self.outbound.recv() => {
                    let Some(payload) = payload else {
                        return Exit::Closed;
                    };
                    if let Err(e) = self.framed.send(payload).await {
                        return Exit::Lost(e);
                    }
                    last_activity = Instant::now();
                }
                _ = sleep_until(idle_deadline) => {
                    trace!(generation = self.generation, "idle, sending heartbeat");
                    if let Err(e) = self.send_heartbeat().await {
                        return Exit::Lost(e);
                    }
                    last_activity = Instant::now();
                }
            }
        }
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        let payload = JsonCodec::encode_request(&Request::heartbeat())?;
        self.framed.send(Bytes::from(payload)).await
    }
}
