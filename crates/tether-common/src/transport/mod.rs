//! Tether Transport Layer
//!
//! This module provides the pieces both ends of a connection use to move
//! messages over TCP.
//!
//! # Architecture
//!
//! - **Transport**: TCP, one persistent connection per client proxy
//! - **Codec**: JSON serialization for protocol messages
//! - **Wire Format**: `[JSON data] 0x00`, one NUL byte after every payload
//!
//! # Components
//!
//! - **[`JsonCodec`]**: Encode/decode protocol messages to JSON
//! - **[`FrameCodec`]**: NUL-delimited framing for `tokio_util::codec::Framed`
//! - **[`TcpConnector`]**: Outbound TCP connect with a bounded timeout
//! - **[`wrap_stream`]**: Optional gzip compression below the frame codec
//!
//! # Frame Size Limits
//!
//! Frames larger than the configured maximum are a protocol error. The
//! decoder fails the stream, and the owner of the connection closes it.

pub mod codec;
pub mod frame;
pub mod stream;
pub mod tcp;

pub use codec::JsonCodec;
pub use frame::{FrameCodec, DEFAULT_MAX_FRAME_SIZE, FRAME_DELIMITER};
pub use stream::{wrap_stream, ByteStream, GzipStream};
pub use tcp::{TcpConnector, DEFAULT_CONNECT_TIMEOUT};

#[cfg(test)]
mod tests;
