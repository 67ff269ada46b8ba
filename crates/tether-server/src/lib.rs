//! Tether Server
//!
//! Server side of the Tether RPC transport. A [`TcpServer`] listens on one or
//! more ports, decodes NUL-delimited request frames and hands each command to
//! an [`Invoker`]. [`HandlerRegistry`] is the stock invoker: closures keyed by
//! target, method and whether the method is static.
//!
//! Heartbeat frames (id 0) are consumed silently.

pub mod config;
pub mod demo;
pub mod invoker;
pub mod server;

pub use config::ServerConfig;
pub use invoker::{HandlerRegistry, Invoker, SERVER_SIDE_EXCEPTION};
pub use server::{ServerHandle, TcpServer};
