// Copyright 2025 Tether Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::MetricsRegistry;
use crate::snapshot::{MeasurerSide, MetricsSnapshot};
use std::time::Instant;

/// Records remote calls on one side of a connection.
///
/// The client stub records every call it makes, including calls that never
/// reached a server; the server records every command it dispatched.
///
/// # Example
///
/// ```rust
/// use tether_metrics::{CallMeasurer, ServerMeasurer};
/// use std::time::Instant;
///
/// let measurer = ServerMeasurer::new();
/// measurer.record_call("demo.Echo.echo", Instant::now(), true);
/// assert_eq!(measurer.snapshot().successful_calls, 1);
/// ```
pub trait CallMeasurer: Send + Sync {
    /// Records a finished call.
    ///
    /// # Arguments
    /// * `method` - Qualified method name (`target.method`)
    /// * `start_time` - When the call started
    /// * `success` - `false` for exceptional results and transport failures
    fn record_call(&self, method: &str, start_time: Instant, success: bool);

    /// Returns a copy of everything recorded so far.
    fn snapshot(&self) -> MetricsSnapshot;

    /// Clears all recorded calls.
    fn reset(&self);
}

/// Measurer used by client stubs
#[derive(Debug, Default)]
pub struct ClientMeasurer {
    registry: MetricsRegistry,
}

impl ClientMeasurer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallMeasurer for ClientMeasurer {
    fn record_call(&self, method: &str, start_time: Instant, success: bool) {
        self.registry.record_call(method, start_time, success);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot(MeasurerSide::Client)
    }

    fn reset(&self) {
        self.registry.reset();
    }
}

/// Measurer used by the server dispatch loop
#[derive(Debug, Default)]
pub struct ServerMeasurer {
    registry: MetricsRegistry,
}

impl ServerMeasurer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CallMeasurer for ServerMeasurer {
    fn record_call(&self, method: &str, start_time: Instant, success: bool) {
        self.registry.record_call(method, start_time, success);
    }

    fn snapshot(&self) -> MetricsSnapshot {
        self.registry.snapshot(MeasurerSide::Server)
    }

    fn reset(&self) {
        self.registry.reset();
    }
}
