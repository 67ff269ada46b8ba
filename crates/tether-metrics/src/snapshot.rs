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

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Which end of a connection produced a snapshot
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MeasurerSide {
    Client,
    Server,
}

/// Metrics for a single `target.method`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MethodMetrics {
    pub call_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub min_latency_us: u64,
    pub max_latency_us: u64,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub side: MeasurerSide,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub avg_latency_us: u64,
    pub min_latency_us: u64,
    pub max_latency_us: u64,
    pub uptime_ms: u64,
    pub methods: HashMap<String, MethodMetrics>,
}

impl MetricsSnapshot {
    pub fn new(side: MeasurerSide, uptime_ms: u64) -> Self {
        Self {
            side,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            avg_latency_us: 0,
            min_latency_us: 0,
            max_latency_us: 0,
            uptime_ms,
            methods: HashMap::new(),
        }
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} calls={} ok={} failed={} avg={}us min={}us max={}us",
            self.side,
            self.total_calls,
            self.successful_calls,
            self.failed_calls,
            self.avg_latency_us,
            self.min_latency_us,
            self.max_latency_us
        )?;

        let mut names: Vec<&String> = self.methods.keys().collect();
        names.sort();
        for name in names {
            let m = &self.methods[name];
            writeln!(
                f,
                "  {} calls={} ok={} failed={} avg={}us min={}us max={}us",
                name,
                m.call_count,
                m.success_count,
                m.failure_count,
                m.avg_latency_us,
                m.min_latency_us,
                m.max_latency_us
            )?;
        }
        Ok(())
    }
}
