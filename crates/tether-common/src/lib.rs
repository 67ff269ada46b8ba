//! Tether Common Types and Transport
//!
//! This crate provides the wire-level value types, the error taxonomy and the
//! framing layer shared by the Tether client and server.
//!
//! # Overview
//!
//! Tether is a connection-pooled RPC substrate: clients keep a fixed set of
//! persistent TCP connections to one or more servers and correlate responses
//! back to callers by request id. This crate contains what both sides agree on:
//!
//! - **Protocol Layer**: [`Command`], [`Request`], [`Response`], [`RpcResult`]
//!   and [`TetherError`]
//! - **Transport Layer**: JSON codec, NUL-delimited frame codec and a TCP
//!   connect helper with a bounded connect timeout
//!
//! # Wire Format
//!
//! - **Transport**: TCP, one long-lived connection per client proxy
//! - **Serialization**: JSON (camelCase field names)
//! - **Message Format**: `[JSON data] 0x00`
//! - **Max Frame Size**: configurable, 8192 bytes by default
//! - **Heartbeat**: `{"id":0,"command":null}`, never answered
//!
//! # Example
//!
//! ```
//! use tether_common::{Command, Param, Request, Response, RpcResult};
//! use serde_json::json;
//!
//! let command = Command::new("demo.Math", "add")
//!     .with_static(true)
//!     .with_param(Param::new(json!(1), "int"))
//!     .with_param(Param::new(json!(2), "int"));
//! let request = Request::new(7, command);
//!
//! let response = Response::new(request.id, RpcResult::value(json!(3), "int"));
//! assert_eq!(response.id, 7);
//! ```

pub mod protocol;
pub mod transport;

pub use protocol::*;
