//! Tether Call Measurement
//!
//! This crate records how many remote calls a client or server handled and how
//! long they took, overall and per `target.method`.
//!
//! # Architecture
//!
//! - [`MetricsRegistry`]: Thread-safe storage with atomic counters per method
//! - [`CallMeasurer`]: Trait the client stub and the server use to record calls
//! - [`MetricsSnapshot`]: Serializable point-in-time copy of the registry
//!
//! # Usage Example
//!
//! ```rust
//! use tether_metrics::{CallMeasurer, ClientMeasurer};
//! use std::time::Instant;
//!
//! let measurer = ClientMeasurer::new();
//!
//! let start = Instant::now();
//! // ... perform the remote call ...
//! measurer.record_call("demo.Echo.echo", start, true);
//!
//! let snapshot = measurer.snapshot();
//! assert_eq!(snapshot.total_calls, 1);
//! ```
//!
//! # Thread Safety
//!
//! Counters are lock-free atomics. The method table sits behind a
//! `parking_lot::RwLock` that is only write-locked the first time a method is
//! seen.

mod collector;
mod registry;
mod snapshot;

pub use collector::{CallMeasurer, ClientMeasurer, ServerMeasurer};
pub use registry::MetricsRegistry;
pub use snapshot::{MeasurerSide, MethodMetrics, MetricsSnapshot};
