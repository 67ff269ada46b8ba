//! Tether Client
//!
//! Client side of the Tether RPC transport: a pool of persistent connection
//! proxies, request correlation by id, bounded reconnect and idle heartbeats.
//!
//! # Components
//!
//! - [`ConnectionPool`]: Owns every proxy; selects one per request (round-robin or
//!   least-workload) and waits when none is available
//! - [`ConnectionProxy`]: One connection with its lifecycle state machine
//!   (`inactive`, `active`, `paused`, `stopped`) and reconnect budget
//! - [`PendingRequestTable`] / [`ResponseFuture`]: Correlate responses to the
//!   requests that caused them
//! - [`RemoteStub`]: Select, send, wait and unwrap in one call
//!
//! # Request Flow
//!
//! 1. The caller selects a proxy from the pool
//! 2. `send` allocates the next id, registers a future and queues the frame
//! 3. The connection driver writes the frame and, later, reads the response
//! 4. The response is routed by id to its future, waking the caller
//!
//! # Example
//!
//! ```rust,no_run
//! use tether_client::{ClientConfig, ConnectionPool, RemoteServer, SelectionPolicy};
//! use tether_common::{Command, Param};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = ConnectionPool::new(ClientConfig::with_servers(vec![
//!     RemoteServer::new("127.0.0.1", 9090),
//! ]));
//! pool.start_up().await?;
//!
//! let proxy = pool.select_proxy(SelectionPolicy::Workload).await?;
//! let future = proxy.send(
//!     Command::new("demo.Echo", "echo").with_param(Param::new(json!("hi"), "string")),
//! )?;
//! let response = future.get().await?;
//! println!("{:?}", response.result);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod future;
pub mod pending;
pub mod pool;
pub mod proxy;
pub mod selection;
pub mod stub;

#[cfg(test)]
mod test_support;

pub use config::{ClientConfig, PauseGracePolicy, ProxySettings, RemoteServer, SelectionPolicy};
pub use future::{FutureState, ResponseFuture};
pub use pending::{PendingRequestTable, RequestIdGenerator};
pub use pool::ConnectionPool;
pub use proxy::{ConnectionProxy, ProxyId, ProxyState};
pub use stub::RemoteStub;
